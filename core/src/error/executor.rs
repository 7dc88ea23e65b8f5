use thiserror::Error;

/// Errors raised while building or driving the task graph.
///
/// Task-scoped execution failures are not errors at this level: they are
/// recorded per task in the build report and propagated to dependents only.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("duplicate task: {0}")]
    DuplicateTask(String),

    #[error("dependency not found: task '{task}' depends on '{missing}'")]
    DependencyNotFound { task: String, missing: String },

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("internal scheduler error: {0}")]
    Internal(String),
}
