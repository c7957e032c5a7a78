//! Host side of the extension logging contract.

use std::sync::Arc;

use flightdeck_core::{Level, LogSink, Logger};

/// Forwards extension log records to the host's `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, source: &str, message: &str) {
        match level {
            Level::Error => tracing::error!(extension = source, "{message}"),
            Level::Warn => tracing::warn!(extension = source, "{message}"),
            Level::Info => tracing::info!(extension = source, "{message}"),
            Level::Debug => tracing::debug!(extension = source, "{message}"),
            Level::Trace => tracing::trace!(extension = source, "{message}"),
        }
    }
}

/// A logger handed to extensions, backed by [`TracingSink`].
pub fn host_logger() -> Logger {
    Logger::new(Arc::new(TracingSink))
}
