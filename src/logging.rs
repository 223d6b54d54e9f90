//! Tracing setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Log file name prefix inside the log directory.
pub const LOG_FILE: &str = "plexlaunch.log";

/// Filter used when `RUST_LOG` is unset. Dependency logs stay quiet.
#[must_use]
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("plexlaunch={level},hf_hub=warn,ureq=warn")
}

/// Install a stderr layer and, when `log_dir` is writable, a daily rolling
/// file layer. Keep the returned guard alive until exit so buffered lines
/// are flushed.
pub fn init(log_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("warning: file logging disabled ({}: {e})", log_dir.display());
            (None, None)
        }
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        // A subscriber is already set (tests, embedding); keep it.
        return None;
    }
    guard
}
