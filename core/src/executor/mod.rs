//! Task execution: dependency graph, build scheduler and the three
//! executor strategies.
//!
//! ```text
//! Blueprint
//!   ↓
//! TaskGraph::for_build()           BUILD.TASKS + transitive REQUIRES closure
//!   ↓
//! TaskGraph::validate()            dangling edges, cycle detection
//!   ↓
//! ExecutionEngine::run()           ready-set dispatch, bounded by WORKERS
//!   ↓                              (completion tracker consulted per task)
//! LocalRunner / RemoteRunner / DbRunner
//!   ↓
//! BuildReport                      per-task terminal states
//! ```
//!
//! Executors share one completion/failure protocol: success writes captured
//! output to the task's result path, failure writes a diagnostic beside it
//! (`<result>.stderr` for local tasks, `<result>.err` for remote and db
//! tasks) and leaves the result path absent.

mod db;
mod engine;
mod graph;
mod local;
mod remote;
pub mod tracker;
mod tunnel;
pub mod worker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::blueprint::{Blueprint, Task, TaskKind};

pub use db::DbRunner;
pub use engine::{BuildReport, ExecutionEngine, TaskReport, TaskState};
pub use graph::TaskGraph;
pub use local::LocalRunner;
pub use remote::RemoteRunner;

/// Terminal outcome of one executor attempt. Execution errors are data, not
/// `Err`: they are task-scoped and must not tear down the scheduler.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success { detail: String },
    Failure { reason: String },
}

/// The one capability all executor strategies implement. The engine picks a
/// runner from the task's variant tag.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn execute(&self, task: &Task, blueprint: &Blueprint) -> TaskOutcome;
}

static LOCAL_RUNNER: LocalRunner = LocalRunner;
static REMOTE_RUNNER: RemoteRunner = RemoteRunner;
static DB_RUNNER: DbRunner = DbRunner;

pub fn runner_for(kind: &TaskKind) -> &'static dyn TaskRunner {
    match kind {
        TaskKind::Local(_) => &LOCAL_RUNNER,
        TaskKind::Remote(_) => &REMOTE_RUNNER,
        TaskKind::Db(_) => &DB_RUNNER,
    }
}

/// `<result path>.<suffix>`, the diagnostic location for a failed task.
pub(crate) fn failure_path(result_path: &Path, suffix: &str) -> PathBuf {
    let mut s = result_path.as_os_str().to_os_string();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

/// Write a task's success artifact; an unwritable result path is itself a
/// task failure.
pub(crate) fn write_success(task: &Task, bytes: &[u8]) -> Result<(), TaskOutcome> {
    std::fs::write(&task.result_path, bytes).map_err(|e| TaskOutcome::Failure {
        reason: format!(
            "could not write results to {}: {e}",
            task.result_path.display()
        ),
    })
}

/// Write a failure diagnostic beside the result path and return the failure
/// outcome. Losing the diagnostic is not a second failure; the reason is
/// still reported upstream.
pub(crate) fn fail_with_diagnostic(
    task: &Task,
    suffix: &str,
    diagnostic: &[u8],
    reason: String,
) -> TaskOutcome {
    let path = failure_path(&task.result_path, suffix);
    if let Err(e) = std::fs::write(&path, diagnostic) {
        tracing::warn!(
            "Task \"{}\" could not write diagnostic to {}: {e}",
            task.name,
            path.display()
        );
    }
    TaskOutcome::Failure { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_path_appends_suffix() {
        assert_eq!(
            failure_path(Path::new("/tmp/out.csv"), "err"),
            PathBuf::from("/tmp/out.csv.err")
        );
        assert_eq!(
            failure_path(Path::new("/tmp/out"), "stderr"),
            PathBuf::from("/tmp/out.stderr")
        );
    }
}
