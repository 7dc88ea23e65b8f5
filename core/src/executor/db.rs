use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use rust_xlsxwriter::Workbook;
use tracing::info;

use crate::blueprint::{
    Blueprint, Credential, Database, DbSpec, Proxy, ResultFormat, Task, TaskKind,
};

use super::remote::connect_session;
use super::tunnel::Tunnel;
use super::worker::{QueryJob, WorkerReport};
use super::{fail_with_diagnostic, TaskOutcome, TaskRunner};

/// The database section carries no timeout of its own; proxy hops for
/// tunnels use the same default connect timeout as untimed remote tasks.
const TUNNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a SQL query against a database, optionally through an SSH tunnel,
/// and serializes the result table to the task's result path.
pub struct DbRunner;

struct DbJob {
    task: Task,
    spec: DbSpec,
    database: Database,
    credential: Credential,
    proxy: Option<(Proxy, Credential)>,
    query: String,
}

#[async_trait]
impl TaskRunner for DbRunner {
    async fn execute(&self, task: &Task, blueprint: &Blueprint) -> TaskOutcome {
        let TaskKind::Db(spec) = &task.kind else {
            return TaskOutcome::Failure {
                reason: "not a db task".to_string(),
            };
        };

        let Some(database) = blueprint.database(&spec.database) else {
            return TaskOutcome::Failure {
                reason: format!("unknown database section \"{}\"", spec.database),
            };
        };
        let Some(credential) = blueprint.credential(&database.credentials) else {
            return TaskOutcome::Failure {
                reason: format!("unknown credentials section \"{}\"", database.credentials),
            };
        };

        let proxy = match &spec.proxy {
            None => None,
            Some(name) => {
                let Some(proxy) = blueprint.proxy(name) else {
                    return TaskOutcome::Failure {
                        reason: format!("unknown proxy section \"{name}\""),
                    };
                };
                let Some(proxy_credential) = blueprint.credential(&proxy.credentials) else {
                    return TaskOutcome::Failure {
                        reason: format!("unknown credentials section \"{}\"", proxy.credentials),
                    };
                };
                Some((proxy.clone(), proxy_credential.clone()))
            }
        };

        let query = match tokio::fs::read_to_string(&spec.query_path).await {
            Ok(query) => query,
            Err(e) => {
                return fail_with_diagnostic(
                    task,
                    "err",
                    e.to_string().as_bytes(),
                    format!("could not read query file {}: {e}", spec.query_path.display()),
                );
            }
        };

        let job = DbJob {
            task: task.clone(),
            spec: spec.clone(),
            database: database.clone(),
            credential: credential.clone(),
            proxy,
            query,
        };

        // Tunnel setup and the worker-process wait are both blocking; the
        // calling worker owns the task for its full duration.
        match tokio::task::spawn_blocking(move || run_db(job)).await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failure {
                reason: format!("query execution panicked: {e}"),
            },
        }
    }
}

fn run_db(job: DbJob) -> TaskOutcome {
    let task = &job.task;
    let db = &job.database;

    // The tunnel guard lives until this function returns, so the forwarded
    // port is released whether the query succeeded or failed.
    let (host, port, _tunnel) = match &job.proxy {
        None => (db.host.clone(), db.port, None),
        Some((proxy, proxy_credential)) => {
            info!("Task \"{}\" connect to proxy \"{}\"", task.name, proxy.host);
            let session = match connect_session(
                &proxy.host,
                proxy.port,
                TUNNEL_CONNECT_TIMEOUT,
                proxy_credential,
            ) {
                Ok(session) => session,
                Err(reason) => {
                    return fail_with_diagnostic(
                        task,
                        "err",
                        reason.as_bytes(),
                        format!("could not create SSH tunnel via \"{}\": {reason}", proxy.host),
                    );
                }
            };

            let tunnel = match Tunnel::open(session, db.host.clone(), db.port) {
                Ok(tunnel) => tunnel,
                Err(reason) => {
                    return fail_with_diagnostic(
                        task,
                        "err",
                        reason.as_bytes(),
                        format!("could not create SSH tunnel via \"{}\": {reason}", proxy.host),
                    );
                }
            };

            let port = tunnel.local_port();
            ("127.0.0.1".to_string(), port, Some(tunnel))
        }
    };

    let url = format!(
        "{}://{}:{}@{}:{}/{}",
        db.engine.scheme(),
        job.credential.user,
        job.credential.password,
        host,
        port,
        db.name
    );

    info!(
        "Task \"{}\" executing query {} against \"{}\"",
        task.name,
        job.spec.query_path.display(),
        db.host
    );

    let (columns, rows) = match run_worker(&QueryJob {
        url,
        query: job.query.clone(),
    }) {
        Ok(table) => table,
        Err(reason) => {
            return fail_with_diagnostic(task, "err", reason.clone().as_bytes(), reason);
        }
    };

    let written = match job.spec.result_format {
        ResultFormat::Csv => write_csv(&task.result_path, &columns, &rows),
        ResultFormat::Xlsx => write_xlsx(&task.result_path, &columns, &rows),
    };

    match written {
        Ok(()) => TaskOutcome::Success {
            detail: format!(
                "{} rows, results in {}",
                rows.len(),
                task.result_path.display()
            ),
        },
        Err(reason) => fail_with_diagnostic(
            task,
            "err",
            reason.as_bytes(),
            format!("could not write results: {reason}"),
        ),
    }
}

/// Spawn the isolated query worker and wait for its report. The worker's
/// stdout is the result channel: no report means the worker crashed, and a
/// crash is an execution failure, never an empty result set.
fn run_worker(job: &QueryJob) -> Result<(Vec<String>, Vec<Vec<String>>), String> {
    let exe = std::env::current_exe()
        .map_err(|e| format!("could not locate own executable for query worker: {e}"))?;

    let mut child = Command::new(exe)
        .arg("query-worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("could not spawn query worker: {e}"))?;

    let payload =
        serde_json::to_vec(job).map_err(|e| format!("could not encode query job: {e}"))?;
    {
        let Some(stdin) = child.stdin.take() else {
            return Err("query worker stdin unavailable".to_string());
        };
        let mut stdin = stdin;
        stdin
            .write_all(&payload)
            .map_err(|e| format!("could not send query job to worker: {e}"))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("could not collect query worker output: {e}"))?;

    match parse_report(&output.stdout) {
        Some(WorkerReport::Ok { columns, rows }) => Ok((columns, rows)),
        Some(WorkerReport::Err { message }) => Err(message),
        None => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "query worker crashed ({}){}{}",
                output.status,
                if stderr.trim().is_empty() { "" } else { ": " },
                stderr.trim()
            ))
        }
    }
}

/// The report is the last parseable line of stdout; drivers may chatter on
/// earlier lines.
fn parse_report(stdout: &[u8]) -> Option<WorkerReport> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .rev()
        .find_map(|line| serde_json::from_str::<WorkerReport>(line.trim()).ok())
}

fn write_csv(path: &Path, columns: &[String], rows: &[Vec<String>]) -> Result<(), String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_path(path)
        .map_err(|e| format!("could not open {}: {e}", path.display()))?;

    writer
        .write_record(columns)
        .map_err(|e| format!("could not write header: {e}"))?;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| format!("could not write row: {e}"))?;
    }
    writer.flush().map_err(|e| format!("could not flush {}: {e}", path.display()))
}

fn write_xlsx(path: &Path, columns: &[String], rows: &[Vec<String>]) -> Result<(), String> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, name.as_str())
            .map_err(|e| format!("could not write header cell: {e}"))?;
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            worksheet
                .write_string(r as u32 + 1, c as u16, value.as_str())
                .map_err(|e| format!("could not write cell: {e}"))?;
        }
    }

    workbook
        .save(path)
        .map_err(|e| format!("could not save {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table() -> (Vec<String>, Vec<Vec<String>>) {
        (
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec!["1".to_string(), "alice".to_string()],
                vec!["2".to_string(), "bob".to_string()],
            ],
        )
    }

    #[test]
    fn csv_output_quotes_non_numeric_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (columns, rows) = table();

        write_csv(&path, &columns, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("\"id\",\"name\""));
        assert_eq!(lines.next(), Some("1,\"alice\""));
        assert_eq!(lines.next(), Some("2,\"bob\""));
    }

    #[test]
    fn xlsx_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        let (columns, rows) = table();

        write_xlsx(&path, &columns, &rows).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn report_is_found_amid_driver_chatter() {
        let stdout = b"NOTICE: connected\n{\"status\":\"ok\",\"columns\":[\"a\"],\"rows\":[[\"1\"]]}\n";
        let report = parse_report(stdout).unwrap();
        assert!(matches!(report, WorkerReport::Ok { .. }));
    }

    #[test]
    fn missing_report_means_crash() {
        assert!(parse_report(b"").is_none());
        assert!(parse_report(b"segfault\n").is_none());
    }
}
