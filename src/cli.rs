// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `stagehand`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Resumable, crash-safe scheduling of multi-stage pipeline work.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, global = true, value_name = "PATH", default_value = "Stagehand.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGEHAND_LOG` filter directives or `info` are used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register the configured units with the store.
    Prepare,

    /// Run the outstanding units of one or more stages.
    Run(RunArgs),

    /// Show the pool partition of a pooled stage.
    Pools {
        stage: String,

        /// 1 lists pools and weights, 2 also lists their members.
        #[arg(long, default_value_t = 1)]
        level: u8,
    },

    /// Reconcile claims left behind by crashed or killed runs.
    ///
    /// Must not be run while another instance is scheduling.
    Sync {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show unit counts per stage and any orphaned claims.
    Status { stage: Option<String> },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Stages to run, in order.
    #[arg(required = true, value_name = "STAGE")]
    pub stages: Vec<String>,

    /// Only these groups (repeatable).
    #[arg(long = "group", value_name = "KEY")]
    pub groups: Vec<String>,

    /// Only these pools (repeatable). Merges are skipped.
    #[arg(long = "pool", value_name = "ID")]
    pub pools: Vec<usize>,

    /// Only units or pools matching these item globs (comma separated).
    /// Merges are skipped.
    #[arg(long, value_name = "GLOB", value_delimiter = ',')]
    pub items: Vec<String>,

    /// Print the commands that would run without running them.
    #[arg(long)]
    pub dry_run: bool,

    /// Write a JSON manifest of the planned operations (`-` for stdout).
    /// Implies `--dry-run`.
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Plan as if nothing had run yet. Only valid with a dry run.
    #[arg(long = "ignore-db")]
    pub ignore_db: bool,

    /// Skip upstream-stage and input-file checks.
    #[arg(long)]
    pub ignore_deps: bool,

    /// Delete leaf outputs once their merge has succeeded.
    #[arg(long)]
    pub remove: bool,

    /// Do not run merge units.
    #[arg(long)]
    pub no_merge: bool,

    /// Groups processed in parallel (overrides `[config].jobs`).
    #[arg(long)]
    pub jobs: Option<usize>,
}

impl RunArgs {
    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.json.is_some()
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
