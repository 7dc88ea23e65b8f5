#[allow(clippy::module_inception)]
pub mod error;

pub mod blueprint;
pub mod executor;

pub use blueprint::BlueprintError;
pub use error::CliError;
pub use executor::ExecutorError;
