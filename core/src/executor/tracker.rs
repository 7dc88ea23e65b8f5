//! Completion tracking: a task's result artifact is its completion marker.
//!
//! Re-running a blueprint is the retry mechanism; tasks whose artifact
//! already exists are skipped unless they asked for cleanup.

use tracing::info;

use crate::blueprint::Task;

/// What to do with a task before dispatching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precheck {
    /// No prior artifact; run normally.
    Run,
    /// A stale artifact was deleted; run.
    CleanedThenRun,
    /// The artifact already satisfies the task; do not invoke its executor.
    SkipExisting,
}

pub fn precheck(task: &Task) -> std::io::Result<Precheck> {
    if !task.result_path.is_file() {
        return Ok(Precheck::Run);
    }

    if task.cleanup {
        std::fs::remove_file(&task.result_path)?;
        info!(
            "Task \"{}\" ({}) previous result \"{}\" deleted",
            task.name,
            task.kind.label(),
            task.result_path.display()
        );
        Ok(Precheck::CleanedThenRun)
    } else {
        info!(
            "Task \"{}\" ({}) will not run, previous result \"{}\" exists",
            task.name,
            task.kind.label(),
            task.result_path.display()
        );
        Ok(Precheck::SkipExisting)
    }
}
