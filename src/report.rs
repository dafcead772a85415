//! User-facing message reporting.
//!
//! Components never log user-facing progress through process-wide state.
//! They receive a [`Reporter`] and send every message through it, which lets
//! the CLI forward messages to `tracing` while tests record them.

use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Something the user should look at.
    Warn,
    /// A failure.
    Error,
}

/// Sink for user-facing messages.
pub trait Reporter: Send + Sync {
    /// Reports one message.
    fn report(&self, level: Level, message: &str);

    /// Reports a debug message.
    fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }

    /// Reports an informational message.
    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    /// Reports a warning.
    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    /// Reports an error.
    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }
}

/// Shared reporter handle.
pub type SharedReporter = Arc<dyn Reporter>;

/// Reporter forwarding every message to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::Debug => debug!("{message}"),
            Level::Info => info!("{message}"),
            Level::Warn => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
    }
}

/// Reporter keeping every message in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Level, String)>>,
}

impl RecordingReporter {
    /// Creates an empty recording reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded messages.
    #[must_use]
    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Returns true if any message at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, level: Level, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        reporter.info("first");
        reporter.warn("second");

        let messages = reporter.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], (Level::Info, String::from("first")));
        assert!(reporter.contains(Level::Warn, "sec"));
        assert!(!reporter.contains(Level::Info, "second"));
    }
}
