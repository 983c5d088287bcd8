//! Capture `tracing` events for assertions.
//!
//! ```rust,ignore
//! let (logs, _guard) = CapturedLogs::install();
//! // ... exercise the pool ...
//! assert!(logs.warnings().iter().any(|r| r.contains("INTRANS")));
//! ```
//!
//! The subscriber is installed for the current thread only, which covers
//! every task spawned on a current-thread runtime such as the one
//! `#[tokio::test]` builds by default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// One captured event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Event level.
    pub level: Level,
    /// Event target.
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Every other field, rendered.
    pub fields: BTreeMap<String, String>,
}

impl LogRecord {
    /// Whether the message or any field value contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.message.contains(needle) || self.fields.values().any(|v| v.contains(needle))
    }

    /// Rendered value of a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.level, self.message)?;
        for (k, v) in &self.fields {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

/// Layer storing every event it sees.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CapturedLogs {
    /// Install a capturing subscriber for the current thread.
    ///
    /// Events are captured until the returned guard is dropped.
    #[must_use]
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    /// Every captured record.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Captured records at `level`.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Captured warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<LogRecord> {
        self.at_level(Level::WARN)
    }

    /// Captured errors.
    #[must_use]
    pub fn errors(&self) -> Vec<LogRecord> {
        self.at_level(Level::ERROR)
    }

    /// Whether a record with the exact `message` was captured.
    #[must_use]
    pub fn has_message(&self, message: &str) -> bool {
        self.records.lock().iter().any(|r| r.message == message)
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.records.lock().push(LogRecord {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
