//! Scoped diagnostics.
//!
//! Every transport instance carries a [`ScopedLog`]: a scope id, a label,
//! and an optional [`LogSink`]. Each diagnostic is emitted as a `tracing`
//! event with the scope attached and is forwarded to the sink when one is
//! installed. The sink is purely observational; nothing in the transport
//! depends on it being present.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use socwire::{LogSink, ScopedLog};
//!
//! #[derive(Default)]
//! struct Collect(Mutex<Vec<(u32, String)>>);
//!
//! impl LogSink for Collect {
//!     fn log(&self, scope: u32, message: &str) {
//!         self.0.lock().unwrap().push((scope, message.to_string()));
//!     }
//! }
//!
//! let sink = Arc::new(Collect::default());
//! let log = ScopedLog::new(3, "<Server>").with_sink(sink.clone());
//! log.debug(format_args!("bind {}", "127.0.0.1:9876"));
//! assert_eq!(sink.0.lock().unwrap()[0], (3, "bind 127.0.0.1:9876".to_string()));
//! ```

use std::fmt;
use std::sync::Arc;

/// Receiver of diagnostic lines.
pub trait LogSink: Send + Sync {
    /// Record one diagnostic line for `scope`.
    fn log(&self, scope: u32, message: &str);
}

/// Cheaply cloneable diagnostics handle bound to one scope.
#[derive(Clone)]
pub struct ScopedLog {
    scope: u32,
    label: Arc<str>,
    sink: Option<Arc<dyn LogSink>>,
}

impl ScopedLog {
    /// Create a handle for `scope`, without a sink.
    pub fn new(scope: u32, label: &str) -> Self {
        Self {
            scope,
            label: Arc::from(label),
            sink: None,
        }
    }

    /// Attach a sink.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Scope id.
    pub fn scope(&self) -> u32 {
        self.scope
    }

    /// Human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Routine lifecycle and traffic events.
    pub fn debug(&self, message: fmt::Arguments<'_>) {
        tracing::debug!(scope = self.scope, label = %self.label, "{}", message);
        self.forward(message);
    }

    /// State transitions worth seeing at default verbosity.
    pub fn info(&self, message: fmt::Arguments<'_>) {
        tracing::info!(scope = self.scope, label = %self.label, "{}", message);
        self.forward(message);
    }

    /// Recoverable failures.
    pub fn warn(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(scope = self.scope, label = %self.label, "{}", message);
        self.forward(message);
    }

    /// Failures that abort an operation or a task.
    pub fn error(&self, message: fmt::Arguments<'_>) {
        tracing::error!(scope = self.scope, label = %self.label, "{}", message);
        self.forward(message);
    }

    fn forward(&self, message: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            sink.log(self.scope, &message.to_string());
        }
    }
}

impl Default for ScopedLog {
    fn default() -> Self {
        Self::new(0, "socwire")
    }
}

impl fmt::Debug for ScopedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLog")
            .field("scope", &self.scope)
            .field("label", &self.label)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u32, String)>>);

    impl LogSink for Recorder {
        fn log(&self, scope: u32, message: &str) {
            self.0.lock().unwrap().push((scope, message.to_string()));
        }
    }

    #[test]
    fn test_forwards_every_level() {
        let recorder = Arc::new(Recorder::default());
        let log = ScopedLog::new(7, "<Client>").with_sink(recorder.clone());

        log.debug(format_args!("a"));
        log.info(format_args!("b {}", 1));
        log.warn(format_args!("c"));
        log.error(format_args!("d"));

        let lines = recorder.0.lock().unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|(scope, _)| *scope == 7));
        assert_eq!(lines[1].1, "b 1");
    }

    #[test]
    fn test_without_sink_is_silent() {
        let log = ScopedLog::new(1, "quiet");
        log.error(format_args!("nobody listens"));
        assert_eq!(log.scope(), 1);
        assert_eq!(log.label(), "quiet");
    }

    #[test]
    fn test_clones_share_sink() {
        let recorder = Arc::new(Recorder::default());
        let log = ScopedLog::default().with_sink(recorder.clone());
        let copy = log.clone();

        copy.debug(format_args!("from clone"));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }
}
