// src/utils/logport.rs

//! Explicit logging port.
//!
//! Components that want their observability events broadcast downstream emit
//! through an injected `LogPort` instead of writing to a global. Every event
//! also goes through the `log` facade, so `env_logger` output is unaffected
//! by whether anyone drains the port.

use chrono::Utc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: String,
    pub message: String,
    pub source: String,
    pub category: String,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

/// Cloneable handle; the receiving half is drained by the orchestrator and
/// forwarded to the broadcast hub as `log` messages.
#[derive(Clone)]
pub struct LogPort {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl LogPort {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, level: log::Level, source: &str, category: &str, message: impl Into<String>) {
        let message = message.into();
        log::log!(level, "[{}] {}", source, message);
        // receiver gone means nobody broadcasts logs any more; not an error
        let _ = self.tx.send(LogEvent {
            level: level.as_str().to_lowercase(),
            message,
            source: source.to_string(),
            category: category.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    pub fn info(&self, source: &str, category: &str, message: impl Into<String>) {
        self.emit(log::Level::Info, source, category, message);
    }

    pub fn warn(&self, source: &str, category: &str, message: impl Into<String>) {
        self.emit(log::Level::Warn, source, category, message);
    }

    pub fn error(&self, source: &str, category: &str, message: impl Into<String>) {
        self.emit(log::Level::Error, source, category, message);
    }
}
