use std::path::Path;

use tracing::info;

use bluebuild_core::blueprint::{normalize, resolve, RawBlueprint};
use bluebuild_core::error::CliError;
use bluebuild_core::executor::ExecutionEngine;

/// One full build pass: load, validate, resolve, execute, report.
///
/// Configuration errors surface as `Err` and abort before any task runs.
/// Task failures do not: the graph drains, and the exit code distinguishes
/// a clean pass (0) from one with failed tasks (1).
pub async fn run_build(blueprint_path: &str) -> Result<i32, CliError> {
    let raw = RawBlueprint::from_path(Path::new(blueprint_path))?;
    let normalized = normalize(raw)?;
    let blueprint = resolve(&normalized)?;

    let engine = ExecutionEngine::new(blueprint);
    let report = engine.run().await?;

    info!("END");
    Ok(if report.all_succeeded() { 0 } else { 1 })
}
