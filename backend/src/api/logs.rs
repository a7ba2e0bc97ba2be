//! Real-time log streaming via Server-Sent Events (SSE).
//!
//! This module provides a broadcast channel for pipeline logs
//! that can be streamed to console clients via SSE.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a pipeline log line, serialized lowercase for the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn stdout_prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "   ",
            LogLevel::Success => "   ✓",
            LogLevel::Warning => "   ⚠️",
            LogLevel::Error => "   ❌",
        }
    }
}

/// One line of pipeline progress, as sent over the SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Pipeline stage that emitted the entry ("parse", "compose", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Info, message: message.into(), source: None }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Success, message: message.into(), source: None }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warning, message: message.into(), source: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into(), source: None }
    }

    pub fn from_stage(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Process-wide broadcaster shared by the CLI narration and the HTTP server.
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Fans log entries out to every connected SSE client.
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Mirror an entry to stdout and broadcast it to subscribers.
    pub fn log(&self, entry: LogEntry) {
        let prefix = entry.level.stdout_prefix();
        match entry.source.as_deref() {
            Some(source) => println!("{} [{}] {}", prefix, source, entry.message),
            None => println!("{} {}", prefix, entry.message),
        }

        // A send with no receivers is fine; the CLI runs without any.
        let _ = self.sender.send(entry);
    }

    /// Receiver end for an SSE connection.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(entry: LogEntry) {
    LOG_BROADCASTER.log(entry);
}

pub fn log_info(msg: impl Into<String>) {
    emit(LogEntry::info(msg));
}

pub fn log_success(msg: impl Into<String>) {
    emit(LogEntry::success(msg));
}

pub fn log_warning(msg: impl Into<String>) {
    emit(LogEntry::warning(msg));
}

pub fn log_error(msg: impl Into<String>) {
    emit(LogEntry::error(msg));
}

pub fn log_info_from(source: &str, msg: impl Into<String>) {
    emit(LogEntry::info(msg).from_stage(source));
}

pub fn log_success_from(source: &str, msg: impl Into<String>) {
    emit(LogEntry::success(msg).from_stage(source));
}
