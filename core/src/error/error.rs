use thiserror::Error;

use super::blueprint::BlueprintError;
use super::executor::ExecutorError;

/// Top-level error for the binary boundary. The CLI maps each variant to a
/// distinct process exit code.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("blueprint error: {0}")]
    Blueprint(#[from] BlueprintError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("command failed: {0}")]
    Command(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
