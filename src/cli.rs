// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::loader::default_settings_path;

/// Command-line arguments for `stratrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stratrun",
    version,
    about = "Run strategy backtests in parallel through an external engine.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the orchestrator settings file (TOML).
    ///
    /// A missing file means "all defaults".
    #[arg(long, value_name = "PATH", default_value_os_t = default_settings_path(), global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STRATRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Backtest one or more strategies against a shared run configuration.
    Backtest {
        /// Run configuration (JSON or TOML).
        #[arg(long, value_name = "PATH")]
        run_config: PathBuf,

        /// Strategy to evaluate; repeat for a batch.
        #[arg(long = "strategy", value_name = "NAME", required = true)]
        strategies: Vec<String>,

        /// Override `[scheduler] max_workers`; at least 1.
        #[arg(
            long,
            value_name = "N",
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
        )]
        workers: Option<usize>,
    },

    /// Start a continuous dry run and print snapshots until Ctrl-C.
    DryRun {
        #[arg(long, value_name = "PATH")]
        run_config: PathBuf,

        #[arg(long, value_name = "NAME")]
        strategy: String,
    },

    /// Print the metadata summary of a run directory.
    Status {
        #[arg(long, value_name = "DIR")]
        run_dir: PathBuf,
    },

    /// Verify (and if needed download) the datasets a run configuration needs.
    CheckData {
        #[arg(long, value_name = "PATH")]
        run_config: PathBuf,
    },
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
