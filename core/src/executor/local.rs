use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::blueprint::{Blueprint, Task, TaskKind};

use super::{fail_with_diagnostic, write_success, TaskOutcome, TaskRunner};

/// Runs a task's command through a shell on the orchestrator host.
pub struct LocalRunner;

#[async_trait]
impl TaskRunner for LocalRunner {
    async fn execute(&self, task: &Task, _blueprint: &Blueprint) -> TaskOutcome {
        let TaskKind::Local(spec) = &task.kind else {
            return TaskOutcome::Failure {
                reason: "not a local task".to_string(),
            };
        };

        debug!("Task \"{}\" spawning: {}", task.name, spec.command);

        let output = match Command::new("sh")
            .arg("-c")
            .arg(&spec.command)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return fail_with_diagnostic(
                    task,
                    "stderr",
                    e.to_string().as_bytes(),
                    format!("could not spawn command: {e}"),
                );
            }
        };

        // A signal-terminated child has no exit code; that can never match a
        // configured success code in [0,255].
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code == spec.success_exit_code {
            if let Err(outcome) = write_success(task, &output.stdout) {
                return outcome;
            }
            TaskOutcome::Success {
                detail: format!(
                    "exit code {exit_code}, results in {}",
                    task.result_path.display()
                ),
            }
        } else {
            let mut diagnostic = output.stderr;
            if diagnostic.is_empty() {
                diagnostic = output.stdout;
            }
            fail_with_diagnostic(
                task,
                "stderr",
                &diagnostic,
                format!(
                    "exit code {exit_code}, expected {}",
                    spec.success_exit_code
                ),
            )
        }
    }
}
