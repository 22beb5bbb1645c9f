// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::dag::Selection;

/// Command-line arguments for `dagrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagrun",
    version,
    about = "Run a DAG of tasks in isolated processes, with retries and resumable checkpoints.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job definition (TOML).
    #[arg(long, short = 'j', value_name = "PATH", default_value = "Dagrun.toml")]
    pub jobdef: PathBuf,

    /// Resume from the checkpoint left by a failed or aborted run.
    #[arg(long, short = 'r')]
    pub restart: bool,

    /// Maximum number of tasks running at once (0 = unbounded).
    ///
    /// Overrides `[config].max_concurrency`.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Do not run this task (repeatable). Dependents treat it as satisfied.
    #[arg(long, value_name = "NAME")]
    pub skip: Vec<String>,

    /// Only run this task and everything it depends on.
    #[arg(long, value_name = "NAME")]
    pub run_to: Option<String>,

    /// Only run this task and everything that depends on it.
    #[arg(long, value_name = "NAME")]
    pub run_from: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one task attempt for a parent orchestrator over stdin/stdout.
    #[command(name = "__worker", hide = true)]
    Worker,
}

impl CliArgs {
    pub fn is_worker(&self) -> bool {
        matches!(self.command, Some(Command::Worker))
    }

    pub fn selection(&self) -> Selection {
        Selection {
            skip: self.skip.clone(),
            run_to: self.run_to.clone(),
            run_from: self.run_from.clone(),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn selection_flags_are_collected() {
        let args = CliArgs::try_parse_from([
            "dagrun", "--skip", "a", "--skip", "b", "--run-to", "c", "--restart",
        ])
        .unwrap();

        assert!(args.restart);
        assert!(!args.is_worker());
        let sel = args.selection();
        assert_eq!(sel.skip, vec!["a", "b"]);
        assert_eq!(sel.run_to.as_deref(), Some("c"));
        assert_eq!(args.jobdef, PathBuf::from("Dagrun.toml"));
    }

    #[test]
    fn worker_subcommand_is_recognised() {
        let args = CliArgs::try_parse_from(["dagrun", "__worker"]).unwrap();
        assert!(args.is_worker());
    }
}
