//! Import activity log, streamed to clients via Server-Sent Events (SSE).
//!
//! Every pipeline stage reports through the helpers below. Entries are
//! printed to stdout and broadcast to any subscribed SSE client; entries
//! about a specific file row carry that row number.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Log level for operator display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// File row the entry is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    /// Timestamp (RFC 3339)
    pub at: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            row: None,
            at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn for_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    fn render(&self) -> String {
        let marker = match self.level {
            LogLevel::Info => " ",
            LogLevel::Success => "✓",
            LogLevel::Warning => "⚠️",
            LogLevel::Error => "❌",
        };
        match self.row {
            Some(row) => format!("   {} [row {}] {}", marker, row, self.message),
            None => format!("   {} {}", marker, self.message),
        }
    }
}

/// Global log broadcaster
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Fans log entries out to stdout and every SSE subscriber
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn log(&self, entry: LogEntry) {
        println!("{}", entry.render());
        // No subscribers is fine.
        let _ = self.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub fn log_info(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Info, msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Success, msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Warning, msg));
}

pub fn log_error(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Error, msg));
}

/// Log an entry tied to a file row.
pub fn log_row(level: LogLevel, row: usize, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(level, msg).for_row(row));
}
