//! Blueprint model: loading, schema validation and reference resolution.
//!
//! A blueprint is a sectioned key/value document describing credentials,
//! SSH proxies, databases and tasks, plus a `[BUILD]` section naming the
//! tasks to execute. Validation runs in three explicit stages, each taking
//! the previous stage's value and returning a new one:
//!
//! ```text
//! RawBlueprint::from_path()        read + parse sections
//!   ↓
//! schema::normalize()              required fields, defaults, ranges
//!   ↓
//! resolve::resolve()               cross-references, REQUIRES, BUILD plan
//!   ↓
//! Blueprint                        immutable for the rest of the run
//! ```

mod load;
pub mod resolve;
pub mod schema;
mod types;

pub use load::{RawBlueprint, RawSection};
pub use resolve::resolve;
pub use schema::normalize;
pub use types::{
    Blueprint, BuildPlan, Credential, Database, DbEngine, DbSpec, LocalSpec, Proxy, RemoteSpec,
    ResultFormat, SectionKind, Task, TaskKind,
};
