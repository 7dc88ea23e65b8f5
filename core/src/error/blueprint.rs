use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors: schema or reference violations in the blueprint.
///
/// Every variant is fatal and aborts the run before any task executes.
#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("cannot read blueprint '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse blueprint '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no {0} section in blueprint")]
    MissingSection(String),

    #[error("section '{section}' has no '{field}' parameter")]
    MissingField { section: String, field: String },

    #[error("section '{section}' '{field}' parameter is empty")]
    EmptyField { section: String, field: String },

    #[error("section '{section}' '{field}' parameter is not an integer: '{value}'")]
    NotAnInteger {
        section: String,
        field: String,
        value: String,
    },

    #[error("section '{section}' '{field}' parameter exceeds range({lo},{hi}): {value}")]
    OutOfRange {
        section: String,
        field: String,
        value: i64,
        lo: i64,
        hi: i64,
    },

    #[error("section '{section}' '{field}' parameter has not an allowed value '{value}' (allowed: {allowed})")]
    NotAllowed {
        section: String,
        field: String,
        value: String,
        allowed: String,
    },

    #[error("section '{section}' has unknown TYPE '{kind}'")]
    UnknownKind { section: String, kind: String },

    #[error("'{key}' is not a valid parameter for BUILD section")]
    UnknownBuildKey { key: String },

    #[error("section '{section}' '{field}' is not a bracketed list of identifiers: {reason}")]
    InvalidList {
        section: String,
        field: String,
        reason: String,
    },

    #[error("task '{task}' has itself in REQUIRES parameter")]
    SelfDependency { task: String },

    #[error("task '{dependency}' in REQUIRES of task '{task}' does not exist in blueprint")]
    UnknownDependency { task: String, dependency: String },

    #[error("section '{section}' '{field}' references '{target}', which does not exist in blueprint")]
    UnknownReference {
        section: String,
        field: String,
        target: String,
    },

    #[error("section '{section}' '{field}' references '{target}' of type {found}, expected {expected}")]
    ReferenceKindMismatch {
        section: String,
        field: String,
        target: String,
        expected: &'static str,
        found: String,
    },

    #[error("build task '{task}' does not exist in blueprint")]
    UnknownBuildTask { task: String },

    #[error("BUILD TASKS parameter is empty")]
    EmptyBuildTasks,
}
