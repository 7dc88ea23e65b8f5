pub mod blueprint;
pub mod error;
pub mod executor;

pub use blueprint::{Blueprint, RawBlueprint};
pub use error::{BlueprintError, CliError, ExecutorError};
pub use executor::{BuildReport, ExecutionEngine, TaskState};
