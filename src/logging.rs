// src/logging.rs

//! Logging setup for `stagehand`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` (one level for every module)
//! 2. `STAGEHAND_LOG`, read as `tracing` filter directives, so a single
//!    module can be turned up, e.g. `info,stagehand::sched::claim=debug`
//! 3. `info`
//!
//! Each line carries the thread name. Group work runs on threads named
//! `worker-N`, which is how interleaved output of `--jobs` runs is told
//! apart. Logs go to stderr; stdout is kept for dry-run traces and listings.

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "STAGEHAND_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(lvl) = cli_level {
        return Ok(EnvFilter::default().add_directive(level_filter(lvl).into()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} value {directives:?}")),
        None => Ok(EnvFilter::default().add_directive(LevelFilter::INFO.into())),
    }
}

fn level_filter(lvl: LogLevel) -> LevelFilter {
    match lvl {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}
