// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// `--resume` without a value means "the most recent run".
pub const LATEST_RUN: &str = "latest";

/// Command-line arguments for `nightdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nightdag",
    version,
    about = "Run a DAG of batch tasks with retries, checkpoints and resume.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `$NIGHTDAG_CONFIG`, else `Nightdag.toml` in the current
    /// working directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NIGHTDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute the workflow.
    Run(RunArgs),
    /// Print the record of a run (default: the most recent one).
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Continue an earlier run instead of starting a new one.
    ///
    /// Without a value, resumes the most recent run.
    #[arg(
        long,
        value_name = "RUN_ID",
        num_args = 0..=1,
        default_missing_value = LATEST_RUN
    )]
    pub resume: Option<String>,

    /// Parse + validate, print the execution plan, but don't run any task.
    #[arg(long, conflicts_with = "resume")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Run id to show.
    #[arg(value_name = "RUN_ID")]
    pub run_id: Option<String>,
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
