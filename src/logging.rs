//! Logging for the relay process.
//!
//! Everything goes to stderr, never stdout: `mmbridge run` uses stdout as the
//! gateway channel. With a logs directory configured, a daily-rotated JSON
//! file is written as well.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated JSON logs.
pub const LOG_FILE_PREFIX: &str = "mmbridge.log";

/// Keeps the file writer alive. Dropping it flushes buffered entries.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// `RUST_LOG` wins over the configured level.
fn level_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
}

/// Log to `{logs_dir}/mmbridge.log.YYYY-MM-DD` as JSON and to stderr as text.
///
/// # Errors
///
/// Fails when the directory cannot be created or a global subscriber is
/// already installed.
pub fn init_production(logs_dir: &Path, level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(level_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("logging already initialised")?;

    Ok(LoggingGuard { _file: guard })
}

/// Log to stderr only. A second call is a no-op.
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}
