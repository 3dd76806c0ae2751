//! Logging setup
//!
//! stdout carries NDJSON events, so tracing output only goes to a daily
//! rolling file. The directory defaults to `<data-local>/simfleet/logs` and
//! can be moved with `SIMFLEET_LOG_DIR`; the filter is read from
//! `SIMFLEET_LOG`.
//!
//! ```bash
//! SIMFLEET_LOG=debug simfleet run
//! SIMFLEET_LOG=simfleet_daemon=trace SIMFLEET_LOG_DIR=./logs simfleet run
//! ```

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Filter directives
pub const LOG_ENV: &str = "SIMFLEET_LOG";

/// Log directory override
pub const LOG_DIR_ENV: &str = "SIMFLEET_LOG_DIR";

const LOG_FILE_PREFIX: &str = "simfleet.log";

const DEFAULT_FILTER: &str = "simfleet=info,simfleet_app=info,simfleet_daemon=info,warn";

/// Install the file subscriber and return the directory it writes to.
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<PathBuf> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                // Batch workers share the runtime; thread ids tell them apart
                .with_thread_ids(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dir = %log_dir.display(),
        "simfleet logging started"
    );

    Ok(log_dir)
}

/// Where log files go: `SIMFLEET_LOG_DIR` if set, else the data-local dir
pub fn log_directory() -> PathBuf {
    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("simfleet")
            .join("logs"),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
