use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bluebuild", about = "Execute a blueprint of local, remote and database tasks")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Blueprint to execute. Required unless a subcommand is given.
    #[arg(short = 'b', long = "blueprint")]
    pub blueprint: Option<String>,

    /// Write a log file into this directory in addition to stderr.
    #[arg(long, global = true)]
    pub log_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Internal: isolated database query worker. The orchestrator spawns
    /// this against its own executable; it reads a query job as JSON on
    /// stdin and reports the result as JSON on stdout.
    #[command(hide = true, name = "query-worker")]
    QueryWorker,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn blueprint_flag_parses() {
        let args = Args::try_parse_from(["bluebuild", "-b", "nightly.blueprint"]).unwrap();
        assert_eq!(args.blueprint.as_deref(), Some("nightly.blueprint"));
        assert!(args.command.is_none());
    }

    #[test]
    fn query_worker_subcommand_parses_without_blueprint() {
        let args = Args::try_parse_from(["bluebuild", "query-worker"]).unwrap();
        assert!(matches!(args.command, Some(Commands::QueryWorker)));
        assert!(args.blueprint.is_none());
    }
}
