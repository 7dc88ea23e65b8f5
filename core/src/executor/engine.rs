use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::blueprint::{Blueprint, Task};
use crate::error::ExecutorError;

use super::graph::TaskGraph;
use super::tracker::{self, Precheck};
use super::{runner_for, TaskOutcome};

/// Terminal state of one task in a build pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Succeeded,
    /// Not run: the result artifact already existed.
    SkippedExisting,
    /// The executor ran and failed, or could not be started.
    Failed { reason: String },
    /// Not run: a task in its dependency chain failed.
    FailedDependency { dependency: String },
}

impl TaskState {
    /// Skipped tasks count as satisfied for their dependents.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SkippedExisting)
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub kind: &'static str,
    pub state: TaskState,
    pub duration_ms: u64,
}

/// Result of one build pass over the dependency graph.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tasks: HashMap<String, TaskReport>,
}

impl BuildReport {
    pub fn all_succeeded(&self) -> bool {
        self.tasks.values().all(|t| t.state.is_satisfied())
    }

    pub fn succeeded(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::Succeeded)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::SkippedExisting)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.len() - self.succeeded() - self.skipped()
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = (String, TaskState, u64)> + Send>>;

/// Build scheduler: walks the dependency graph and executes ready tasks with
/// bounded concurrency.
///
/// Dispatch is ready-set driven: a task launches as soon as every task in its
/// `REQUIRES` set is satisfied and a worker permit is free. A failure marks
/// all transitive dependents failed-without-running; unrelated subgraphs keep
/// draining — the scheduler is best-effort, not fail-fast.
pub struct ExecutionEngine {
    blueprint: Arc<Blueprint>,
}

impl ExecutionEngine {
    pub fn new(blueprint: Blueprint) -> Self {
        Self {
            blueprint: Arc::new(blueprint),
        }
    }

    pub async fn run(&self) -> Result<BuildReport, ExecutorError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();

        let graph = TaskGraph::for_build(&self.blueprint)?;
        graph.validate()?;

        // Cycle check doubles as the execution plan for the debug log.
        let stages = graph.topological_sort()?;
        debug!(
            "run {run_id}: {} tasks in {} stages: {:?}",
            graph.nodes.len(),
            stages.len(),
            stages
        );

        let workers = self.blueprint.build.workers;
        info!(
            "run {run_id}: executing {} tasks with {} workers",
            graph.nodes.len(),
            workers
        );

        let states = self.drive(&graph, workers).await?;

        let tasks: HashMap<String, TaskReport> = states
            .into_iter()
            .map(|(name, (state, duration_ms))| {
                let kind = graph.nodes[&name].kind.label();
                (
                    name.clone(),
                    TaskReport {
                        name,
                        kind,
                        state,
                        duration_ms,
                    },
                )
            })
            .collect();

        let report = BuildReport {
            run_id,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            tasks,
        };

        info!(
            "run {}: {} succeeded, {} skipped, {} failed in {}ms",
            report.run_id,
            report.succeeded(),
            report.skipped(),
            report.failed(),
            report.duration_ms
        );

        Ok(report)
    }

    async fn drive(
        &self,
        graph: &TaskGraph,
        workers: usize,
    ) -> Result<HashMap<String, (TaskState, u64)>, ExecutorError> {
        let total = graph.nodes.len();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));

        let mut unmet: HashMap<String, usize> = graph
            .edges
            .iter()
            .map(|(name, requires)| (name.clone(), requires.len()))
            .collect();
        let mut states: HashMap<String, (TaskState, u64)> = HashMap::new();
        let mut in_flight: FuturesUnordered<TaskFuture> = FuturesUnordered::new();

        for (name, &count) in &unmet {
            if count == 0 {
                in_flight.push(self.launch(graph.nodes[name].clone(), semaphore.clone()));
            }
        }

        let mut terminal = 0;
        while terminal < total {
            let Some((name, state, duration_ms)) = in_flight.next().await else {
                // Validation rejects cycles, so an empty in-flight set with
                // unfinished tasks means scheduler state is corrupt.
                return Err(ExecutorError::Internal(format!(
                    "scheduler stalled with {} tasks outstanding",
                    total - terminal
                )));
            };

            let satisfied = state.is_satisfied();
            states.insert(name.clone(), (state, duration_ms));
            terminal += 1;

            if satisfied {
                for dependent in graph.reverse_edges.get(&name).into_iter().flatten() {
                    if states.contains_key(dependent) {
                        continue;
                    }
                    let count = unmet.get_mut(dependent).expect("node present");
                    *count -= 1;
                    if *count == 0 {
                        in_flight
                            .push(self.launch(graph.nodes[dependent].clone(), semaphore.clone()));
                    }
                }
            } else {
                terminal += self.fail_dependents(&name, graph, &mut states);
            }
        }

        Ok(states)
    }

    /// Mark every not-yet-terminal transitive dependent of `failed` as
    /// failed-without-running. Returns how many tasks were marked.
    fn fail_dependents(
        &self,
        failed: &str,
        graph: &TaskGraph,
        states: &mut HashMap<String, (TaskState, u64)>,
    ) -> usize {
        let mut marked = 0;
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(failed.to_string());

        while let Some(name) = queue.pop_front() {
            for dependent in graph.reverse_edges.get(&name).into_iter().flatten() {
                if states.contains_key(dependent) {
                    continue;
                }
                error!(
                    "Task \"{}\" ({}) will not run: required task \"{}\" failed",
                    dependent,
                    graph.nodes[dependent].kind.label(),
                    name
                );
                states.insert(
                    dependent.clone(),
                    (
                        TaskState::FailedDependency {
                            dependency: name.clone(),
                        },
                        0,
                    ),
                );
                marked += 1;
                queue.push_back(dependent.clone());
            }
        }

        marked
    }

    fn launch(&self, task: Task, semaphore: Arc<Semaphore>) -> TaskFuture {
        let blueprint = self.blueprint.clone();

        Box::pin(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        task.name.clone(),
                        TaskState::Failed {
                            reason: "worker pool closed unexpectedly".to_string(),
                        },
                        0,
                    );
                }
            };

            let started = Instant::now();
            let name = task.name.clone();
            let kind = task.kind.label();

            match tracker::precheck(&task) {
                Ok(Precheck::SkipExisting) => {
                    return (name, TaskState::SkippedExisting, 0);
                }
                Ok(Precheck::Run) | Ok(Precheck::CleanedThenRun) => {}
                Err(e) => {
                    error!(
                        "Task \"{}\" ({}) could not clean previous result \"{}\": {e}",
                        name,
                        kind,
                        task.result_path.display()
                    );
                    return (
                        name,
                        TaskState::Failed {
                            reason: format!("could not clean previous result: {e}"),
                        },
                        0,
                    );
                }
            }

            info!("Task \"{}\" ({}) starting execution", name, kind);

            let outcome = runner_for(&task.kind).execute(&task, &blueprint).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                TaskOutcome::Success { detail } => {
                    info!("Task \"{}\" ({}) succeeded: {detail}", name, kind);
                    (name, TaskState::Succeeded, duration_ms)
                }
                TaskOutcome::Failure { reason } => {
                    error!("Task \"{}\" ({}) failed: {reason}", name, kind);
                    (name, TaskState::Failed { reason }, duration_ms)
                }
            }
        })
    }
}
