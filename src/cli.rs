// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runvisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runvisor",
    version,
    about = "Run a command under supervision, stream its output, and stop it cleanly on Ctrl-C.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Runvisor.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Run the `[run.<NAME>]` template from the config file. Any trailing
    /// arguments are appended to the template's own arguments.
    #[arg(long, value_name = "NAME")]
    pub template: Option<String>,

    /// Override `[supervisor].grace_period` (e.g. "2s", "500ms").
    #[arg(long, value_name = "DURATION")]
    pub grace_period: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve config and command, print them, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Program and arguments to run (after `--`), or extra template
    /// arguments when `--template` is given.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
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
