// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `toolflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "toolflow",
    version,
    about = "Run a dataflow session of scripted analysis tools.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the session file (TOML).
    ///
    /// Default: `Toolflow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Toolflow.toml")]
    pub session: String,

    /// Exit once every tool is idle instead of waiting for changes.
    #[arg(long)]
    pub once: bool,

    /// Only trigger this tool at startup (downstream tools still follow).
    #[arg(long, value_name = "NAME")]
    pub tool: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TOOLFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the tools and their bindings, but don't run
    /// any script.
    #[arg(long)]
    pub dry_run: bool,

    /// Where rendered outputs go.
    #[arg(long, value_enum, value_name = "FORMAT", default_value = "log")]
    pub output: OutputFormat,
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

/// Presenter selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Summaries as log events on stderr.
    Log,
    /// One JSON object per rendered output on stdout.
    Json,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
