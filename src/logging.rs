//! Asynchronous, level-filtered logging sink built on `tracing` + `tracing-appender`.
//!
//! The concrete form of the "structured, asynchronous, level-filtered sink" component: a
//! non-blocking writer sized by `--log-queue-size`, gated off entirely when `--open-log` is
//! false.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Must be kept alive for the lifetime of the process; dropping it flushes and joins the
/// background writer thread.
pub struct LoggingHandle {
    _guard: Option<WorkerGuard>,
}

fn level_name(log_level: u8) -> &'static str {
    match log_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

pub fn init(config: &Config) -> LoggingHandle {
    if !config.open_log {
        return LoggingHandle { _guard: None };
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_name(config.log_level)));

    let (writer, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(config.log_queue_size)
        .finish(std::io::stdout());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("global tracing subscriber already set");
    }

    LoggingHandle {
        _guard: Some(guard),
    }
}
