//! Debug file logging for modsync
//!
//! Writes a detailed trace log to `<data>/logs/modsync.log.<date>`, rotated
//! daily, next to the store it describes.

use std::path::{Path, PathBuf};

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::progress;

/// Log directory under the data directory
pub const LOG_DIR: &str = "logs";

/// Debug log guard - keeps the file logger alive
pub struct DebugLogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Session info returned after initializing debug logging
pub struct SessionInfo {
    pub log_dir: PathBuf,
    pub guard: DebugLogGuard,
}

/// Initialize combined logging: file (detailed) + console (through the bar writer).
///
/// The guard must be kept alive for the duration of the program.
pub fn init(data_dir: &Path, verbose: bool) -> std::io::Result<SessionInfo> {
    let log_dir = data_dir.join(LOG_DIR);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "modsync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: detailed debug output
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_level = if verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(progress::ProgressWriter)
        .with_target(false)
        .with_filter(console_level);

    // File filter: everything from our own crates, warnings from the rest
    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("warn,modsync=trace,modsync_core=trace")
    });

    tracing_subscriber::registry()
        .with(file_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(SessionInfo {
        log_dir,
        guard: DebugLogGuard { _guard: guard },
    })
}
