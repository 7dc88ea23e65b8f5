use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::info;

use crate::blueprint::{Blueprint, Credential, Proxy, RemoteSpec, Task, TaskKind};

use super::tunnel::Tunnel;
use super::{fail_with_diagnostic, write_success, TaskOutcome, TaskRunner};

/// Runs a task's command on a remote host over SSH, optionally hopping
/// through an `SSH_PROXY` section first.
pub struct RemoteRunner;

/// Everything the blocking SSH path needs, extracted from the blueprint so
/// the job can move onto a blocking thread.
struct RemoteJob {
    task: Task,
    spec: RemoteSpec,
    credential: Credential,
    proxy: Option<(Proxy, Credential)>,
}

#[async_trait]
impl TaskRunner for RemoteRunner {
    async fn execute(&self, task: &Task, blueprint: &Blueprint) -> TaskOutcome {
        let TaskKind::Remote(spec) = &task.kind else {
            return TaskOutcome::Failure {
                reason: "not a remote task".to_string(),
            };
        };

        let Some(credential) = blueprint.credential(&spec.credentials) else {
            return TaskOutcome::Failure {
                reason: format!("unknown credentials section \"{}\"", spec.credentials),
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

        let job = RemoteJob {
            task: task.clone(),
            spec: spec.clone(),
            credential: credential.clone(),
            proxy,
        };

        // ssh2 is a blocking transport; keep the worker's async slot by
        // running the whole session on the blocking pool.
        match tokio::task::spawn_blocking(move || run_remote(job)).await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failure {
                reason: format!("remote execution panicked: {e}"),
            },
        }
    }
}

fn run_remote(job: RemoteJob) -> TaskOutcome {
    let task = &job.task;
    let spec = &job.spec;

    // _tunnel keeps the proxy hop alive for the session's lifetime.
    let (session, _tunnel) = match &job.proxy {
        None => {
            info!("Task \"{}\" SSH connect to host \"{}\"", task.name, spec.host);
            match connect_session(&spec.host, spec.port, spec.timeout, &job.credential) {
                Ok(session) => (session, None),
                Err(reason) => {
                    return connection_failure(task, &spec.host, spec.port, reason);
                }
            }
        }
        Some((proxy, proxy_credential)) => {
            info!("Task \"{}\" SSH connect to proxy \"{}\"", task.name, proxy.host);
            let proxy_session =
                match connect_session(&proxy.host, proxy.port, spec.timeout, proxy_credential) {
                    Ok(session) => session,
                    Err(reason) => {
                        return connection_failure(task, &proxy.host, proxy.port, reason);
                    }
                };

            let tunnel = match Tunnel::open(proxy_session, spec.host.clone(), spec.port) {
                Ok(tunnel) => tunnel,
                Err(reason) => {
                    return connection_failure(task, &spec.host, spec.port, reason);
                }
            };

            info!(
                "Task \"{}\" SSH connect to host \"{}\" through proxy",
                task.name, spec.host
            );
            match connect_session("127.0.0.1", tunnel.local_port(), spec.timeout, &job.credential)
            {
                Ok(session) => (session, Some(tunnel)),
                Err(reason) => {
                    return connection_failure(task, &spec.host, spec.port, reason);
                }
            }
        }
    };

    let (exit_code, stdout, stderr) = match run_command(&session, &spec.command) {
        Ok(result) => result,
        Err(reason) => {
            return fail_with_diagnostic(
                task,
                "err",
                reason.as_bytes(),
                format!("command did not complete on \"{}\": {reason}", spec.host),
            );
        }
    };

    if exit_code == spec.success_exit_code {
        if let Err(outcome) = write_success(task, stdout.as_bytes()) {
            return outcome;
        }
        TaskOutcome::Success {
            detail: format!(
                "exit code {exit_code}, results in {}",
                task.result_path.display()
            ),
        }
    } else {
        let diagnostic = if stderr.is_empty() { &stdout } else { &stderr };
        fail_with_diagnostic(
            task,
            "err",
            diagnostic.as_bytes(),
            format!("exit code {exit_code}, expected {}", spec.success_exit_code),
        )
    }
}

fn connection_failure(task: &Task, host: &str, port: u16, reason: String) -> TaskOutcome {
    fail_with_diagnostic(
        task,
        "err",
        reason.as_bytes(),
        format!("could not connect to host \"{host}\" on port {port}: {reason}"),
    )
}

/// Open, handshake and authenticate one SSH session. Authentication tries
/// the credential's private key first, then its password.
pub(crate) fn connect_session(
    host: &str,
    port: u16,
    timeout: Duration,
    credential: &Credential,
) -> Result<Session, String> {
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("could not resolve {host}:{port}: {e}"))?
        .next()
        .ok_or_else(|| format!("could not resolve {host}:{port}"))?;

    let stream = if timeout.is_zero() {
        TcpStream::connect(address)
    } else {
        TcpStream::connect_timeout(&address, timeout)
    }
    .map_err(|e| format!("tcp connect failed: {e}"))?;

    let mut session = Session::new().map_err(|e| format!("ssh session init failed: {e}"))?;
    session.set_timeout(timeout.as_millis() as u32);
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| format!("ssh handshake failed: {e}"))?;

    if !credential.private_key.is_empty() {
        let passphrase = if credential.password.is_empty() {
            None
        } else {
            Some(credential.password.as_str())
        };
        let attempted = session.userauth_pubkey_file(
            &credential.user,
            None,
            Path::new(&credential.private_key),
            passphrase,
        );
        if attempted.is_err() && credential.password.is_empty() {
            return Err(format!(
                "ssh key authentication failed for user \"{}\"",
                credential.user
            ));
        }
    }

    if !session.authenticated() {
        session
            .userauth_password(&credential.user, &credential.password)
            .map_err(|e| format!("ssh authentication failed for user \"{}\": {e}", credential.user))?;
    }

    if !session.authenticated() {
        return Err(format!(
            "ssh authentication failed for user \"{}\"",
            credential.user
        ));
    }

    Ok(session)
}

fn run_command(session: &Session, command: &str) -> Result<(i32, String, String), String> {
    let mut channel = session
        .channel_session()
        .map_err(|e| format!("could not open exec channel: {e}"))?;
    channel
        .exec(command)
        .map_err(|e| format!("could not start command: {e}"))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| format!("could not read command output: {e}"))?;

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| format!("could not read command stderr: {e}"))?;

    channel
        .wait_close()
        .map_err(|e| format!("could not close exec channel: {e}"))?;
    let exit_code = channel
        .exit_status()
        .map_err(|e| format!("could not read exit status: {e}"))?;

    Ok((exit_code, stdout, stderr))
}
