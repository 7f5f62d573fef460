//! Logging setup.
//!
//! stdout carries the native-messaging frames, so logs go to stderr (the
//! browser collects it) and to a daily rolling file when the log directory
//! is writable.

use crate::config::BridgeConfig;
use fs_err as fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "bridge.log";

/// Installs the global subscriber. Keep the returned guard alive for the
/// whole process so buffered file output is flushed on exit.
pub fn init(config: &BridgeConfig) -> Option<WorkerGuard> {
    let filter = if config.debug_log {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(io::stderr);

    let (file_layer, guard) = match config.log_dir() {
        Some(dir) if fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}
