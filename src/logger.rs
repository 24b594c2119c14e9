use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// Sets up:
/// - File output: rolling log files in `{log_dir}/narrator.log` with daily
///   rotation, keeping the latest 5 files.
/// - Console output (stderr): compact, human-readable. stdout carries the
///   JSON-line protocol and must stay clean.
/// - Environment filter: defaults to `info`, configurable via `RUST_LOG`.
///
/// Fails if a global subscriber is already set.
pub fn init(log_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("narrator")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir)
        .context("Failed to create log file appender")?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .compact();

    // Quiet the HTTP stack unless asked for.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn,mio=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logger already initialized")?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}

/// Stderr-only fallback for when the log directory is unusable.
pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
