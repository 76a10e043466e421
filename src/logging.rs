// src/logging.rs

//! Subscriber setup for the `taskgate` binary.
//!
//! `--log-level` wins when given. Otherwise `TASKGATE_LOG` is read as an
//! `EnvFilter` directive list, so `TASKGATE_LOG=info,taskgate::worker=trace`
//! works as well as a bare level. With neither, the filter is `info`.
//! Logs go to stderr; stdout carries the batch summary and the final report.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "TASKGATE_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(lvl.as_level().as_str()),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(())
}

