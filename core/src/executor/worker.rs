//! Child-process half of database query isolation.
//!
//! The orchestrator never runs a query in its own process: a driver crash or
//! runaway query must cost at most one worker slot. The parent re-invokes its
//! own executable with the hidden `query-worker` subcommand, writes a
//! [`QueryJob`] as JSON on this process's stdin, and reads a single
//! [`WorkerReport`] line from stdout. Query failures travel inside the
//! report; a missing or unparseable report means this process crashed.

use std::io::Read;

use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::{Column, Row};

/// What the parent asks the worker to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJob {
    /// Full connection URL, already pointed at the tunnel endpoint when one
    /// is in use.
    pub url: String,
    pub query: String,
}

/// The single message a worker sends back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReport {
    Ok {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Err {
        message: String,
    },
}

/// Entry point for the `query-worker` subcommand. Always exits 0 after
/// emitting a report; a non-zero exit means the worker itself died.
pub async fn run() -> i32 {
    let mut input = String::new();
    let report = match std::io::stdin().read_to_string(&mut input) {
        Err(e) => WorkerReport::Err {
            message: format!("could not read query job: {e}"),
        },
        Ok(_) => match serde_json::from_str::<QueryJob>(&input) {
            Err(e) => WorkerReport::Err {
                message: format!("could not parse query job: {e}"),
            },
            Ok(job) => execute(&job).await,
        },
    };

    match serde_json::to_string(&report) {
        Ok(line) => {
            println!("{line}");
            0
        }
        Err(_) => 1,
    }
}

async fn execute(job: &QueryJob) -> WorkerReport {
    sqlx::any::install_default_drivers();

    let pool = match AnyPoolOptions::new()
        .max_connections(1)
        .connect(&job.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            return WorkerReport::Err {
                message: format!("could not connect to database: {e}"),
            }
        }
    };

    let rows = match sqlx::query(&job.query).fetch_all(&pool).await {
        Ok(rows) => rows,
        Err(e) => {
            return WorkerReport::Err {
                message: format!("could not execute query: {e}"),
            }
        }
    };

    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| (0..row.columns().len()).map(|i| cell_to_string(row, i)).collect())
        .collect();

    WorkerReport::Ok { columns, rows }
}

/// Stringify one cell. The Any driver has no uniform text decode, so try the
/// common scalar types in order; NULL becomes the empty string.
fn cell_to_string(row: &sqlx::any::AnyRow, i: usize) -> String {
    use sqlx::ValueRef;

    if let Ok(value) = row.try_get_raw(i) {
        if value.is_null() {
            return String::new();
        }
    }

    row.try_get::<i64, _>(i)
        .map(|v| v.to_string())
        .or_else(|_| row.try_get::<f64, _>(i).map(|v| v.to_string()))
        .or_else(|_| row.try_get::<bool, _>(i).map(|v| v.to_string()))
        .or_else(|_| row.try_get::<String, _>(i))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_json() {
        let report = WorkerReport::Ok {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec!["1".to_string(), "alice".to_string()]],
        };

        let line = serde_json::to_string(&report).unwrap();
        assert!(line.contains("\"status\":\"ok\""));

        let parsed: WorkerReport = serde_json::from_str(&line).unwrap();
        let WorkerReport::Ok { columns, rows } = parsed else {
            panic!("round trip changed the variant");
        };
        assert_eq!(columns, vec!["id", "name"]);
        assert_eq!(rows, vec![vec!["1", "alice"]]);
    }

    #[test]
    fn error_report_carries_the_message() {
        let line = serde_json::to_string(&WorkerReport::Err {
            message: "boom".to_string(),
        })
        .unwrap();

        let parsed: WorkerReport = serde_json::from_str(&line).unwrap();
        assert!(matches!(parsed, WorkerReport::Err { ref message } if message == "boom"));
    }
}
