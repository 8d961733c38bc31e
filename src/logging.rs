//! Opt-in tracing setup with a daily-rolling log file.
//!
//! The library itself only emits `tracing` events (targets `session`,
//! `capture`, `pipeline`); host applications either install their own
//! subscriber or call `init_logging` once at startup.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Guards that must be kept alive for the process lifetime so buffered log
/// lines are flushed.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Default log directory under the platform data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelcap")
        .join("logs")
}

/// Initialize the global tracing subscriber with a daily-rolling file
/// appender. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: Option<PathBuf>) -> LoggingGuards {
    let log_dir = log_dir.unwrap_or_else(default_log_dir);

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).expect("Failed to create logs directory");
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "reelcap.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global tracing subscriber");

    tracing::info!(target: "session", "Logging initialized at {:?}", log_dir);

    LoggingGuards {
        _guards: vec![guard],
    }
}
