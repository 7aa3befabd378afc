//! Prefixed, scoped logging for pipeline stages.
//!
//! Every message gets a [`LogService`] prefixed with `[subject]`; each stage
//! narrows it with [`LogService::scope`], producing lines such as
//! `[orders.create][timing][before]Handling`. Lines go to a [`LogSink`]:
//! [`TracingSink`] in production, [`MemorySink`] when a test needs to assert
//! on the exact sequence.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal pipeline progress.
    Info,
    /// Unexpected but recoverable.
    Warn,
    /// A stage failed.
    Error,
}

/// One emitted line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,
    /// Prefix and message, e.g. `[echo][handle]Handling`.
    pub text: String,
}

/// Destination for log lines.
pub trait LogSink: Send + Sync + 'static {
    /// Writes a single line.
    fn write(&self, level: LogLevel, line: &str);
}

/// Forwards lines to `tracing` under the `hermes::pipeline` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "hermes::pipeline", "{line}"),
            LogLevel::Info => tracing::info!(target: "hermes::pipeline", "{line}"),
            LogLevel::Warn => tracing::warn!(target: "hermes::pipeline", "{line}"),
            LogLevel::Error => tracing::error!(target: "hermes::pipeline", "{line}"),
        }
    }
}

/// Records lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line recorded so far.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Text of every line recorded so far.
    pub fn texts(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.text.clone()).collect()
    }

    /// Text of lines at `level`.
    pub fn texts_at(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.level == level)
            .map(|l| l.text.clone())
            .collect()
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, line: &str) {
        self.lines.lock().push(LogLine {
            level,
            text: line.to_string(),
        });
    }
}

/// A log handle carrying a bracketed prefix.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hermes_core::{LogService, MemorySink};
///
/// let sink = Arc::new(MemorySink::new());
/// let log = LogService::new(sink.clone()).scope("echo").scope("handle");
/// log.info("Handling");
/// assert_eq!(sink.texts(), vec!["[echo][handle]Handling"]);
/// ```
#[derive(Clone)]
pub struct LogService {
    prefix: String,
    sink: Arc<dyn LogSink>,
}

impl LogService {
    /// Creates an unscoped log writing to `sink`.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            prefix: String::new(),
            sink,
        }
    }

    /// Creates an unscoped log writing to [`TracingSink`].
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Returns a copy with `[segment]` appended to the prefix.
    #[must_use]
    pub fn scope(&self, segment: &str) -> Self {
        Self {
            prefix: format!("{}[{segment}]", self.prefix),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Current prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Writes `message` at `level`.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        self.sink.write(level, &format!("{}{message}", self.prefix));
    }

    /// Writes at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    /// Writes at info level.
    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    /// Writes at warn level.
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    /// Writes at error level.
    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

impl Default for LogService {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for LogService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogService")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest() {
        let sink = Arc::new(MemorySink::new());
        let base = LogService::new(sink.clone()).scope("orders");
        let stage = base.scope("auth").scope("before");
        stage.info("Handling");
        base.warn("End");

        assert_eq!(stage.prefix(), "[orders][auth][before]");
        assert_eq!(
            sink.texts(),
            vec!["[orders][auth][before]Handling".to_string(), "[orders]End".to_string()]
        );
        assert_eq!(sink.texts_at(LogLevel::Warn), vec!["[orders]End".to_string()]);
    }

    #[test]
    fn test_clear() {
        let sink = Arc::new(MemorySink::new());
        LogService::new(sink.clone()).error("boom");
        assert_eq!(sink.lines()[0].level, LogLevel::Error);
        sink.clear();
        assert!(sink.lines().is_empty());
    }
}
