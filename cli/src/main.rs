use clap::Parser;
mod app;
mod commands;
use bluebuild_core::error::{BlueprintError, CliError};
use bluebuild_core::executor::worker;
use commands::cli;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();

    // The query worker is a pipe protocol: its stdout belongs to the parent
    // orchestrator, so no logging is wired up for it.
    if let Some(cli::Commands::QueryWorker) = args.command {
        return Ok(worker::run().await);
    }

    init_tracing(args.log_dir.as_deref()).map_err(CliError::Command)?;

    let blueprint = args
        .blueprint
        .as_deref()
        .ok_or_else(|| CliError::Command("no blueprint given".to_string()))?;

    app::run_build(blueprint).await
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: build pass, all requested tasks succeeded
    // 1: build pass completed with failed tasks (returned, not an error)
    // 11: configuration error (schema / reference violation)
    // 20: blueprint or file IO error
    // 50: internal/uncategorized
    match e {
        CliError::Blueprint(be) => match be {
            BlueprintError::Io { .. } => 20,
            _ => 11,
        },
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Executor(_) => 50,
        CliError::Anyhow(_) => 50,
    }
}

fn init_tracing(log_dir: Option<&str>) -> Result<(), String> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new("info").map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if let Some(dir) = log_dir.map(str::trim).filter(|s| !s.is_empty()) {
        let dir = std::path::PathBuf::from(dir);
        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("bluebuild.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr));

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
