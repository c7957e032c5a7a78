//! Logging sink passed explicitly to extensions.
//!
//! A plugin library carries its own copy of any global logging facade, so it
//! cannot see the host's subscriber. Extensions log through the [`Logger`]
//! they receive in `initialize` instead.

use std::fmt;
use std::sync::Arc;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// Destination for log records, implemented by the host.
pub trait LogSink: Send + Sync {
    /// Records a message emitted by `source`.
    fn log(&self, level: Level, source: &str, message: &str);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _source: &str, _message: &str) {}
}

/// Cheaply clonable handle to a [`LogSink`], tagged with a source name.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    source: Arc<str>,
}

impl Logger {
    /// Creates a logger writing to `sink` with an empty source.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            source: Arc::from(""),
        }
    }

    /// Returns a logger for the same sink tagged with `source`.
    pub fn named(&self, source: impl AsRef<str>) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            source: Arc::from(source.as_ref()),
        }
    }

    /// Source tag attached to every record.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.sink.log(level, &self.source, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::Debug, message);
    }

    pub fn trace(&self, message: impl AsRef<str>) {
        self.log(Level::Trace, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
