// src/logging.rs

//! Logging init: console plus a daily rolling file, or console only if the
//! log directory cannot be created.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the rolling log files (`odm.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "odm";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. `None` means file logging was unavailable.
pub fn init_logging(log_dir: &Path, default_level: &str) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        init_console_logging(default_level);
        tracing::warn!(
            dir = %log_dir.display(),
            error = %e,
            "log directory unavailable, logging to console only"
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()
        .ok();

    tracing::info!(dir = %log_dir.display(), "logging initialized");
    Some(guard)
}

/// Console-only logging.
pub fn init_console_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
