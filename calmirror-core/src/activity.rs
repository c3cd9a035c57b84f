//! Activity log: the bounded, queryable record of what each pass did.
//!
//! Every entry is also emitted through `tracing`, so process logs and the
//! activity log never disagree.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Add,
    Update,
    Delete,
    Skip,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Add => "add",
            LogLevel::Update => "update",
            LogLevel::Delete => "delete",
            LogLevel::Skip => "skip",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Receives each entry as it is recorded (e.g. a file writer).
pub trait LogSink: Send + Sync {
    fn append(&self, entry: &LogEntry);
}

/// Ring buffer of the most recent entries.
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ActivityLog {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn record(&self, level: LogLevel, message: impl Into<String>, details: Option<serde_json::Value>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        };

        emit_tracing(&entry);
        for sink in &self.sinks {
            sink.append(&entry);
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message, None);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(LogLevel::Success, message, None);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message, None);
    }

    pub fn error(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.record(LogLevel::Error, message, details);
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        ActivityLog::new(DEFAULT_RETENTION)
    }
}

fn emit_tracing(entry: &LogEntry) {
    let details = entry.details.as_ref().map(|d| d.to_string());
    match entry.level {
        LogLevel::Error => {
            tracing::error!(kind = %entry.level, details = ?details, "{}", entry.message)
        }
        LogLevel::Warning => {
            tracing::warn!(kind = %entry.level, details = ?details, "{}", entry.message)
        }
        _ => tracing::info!(kind = %entry.level, details = ?details, "{}", entry.message),
    }
}
