//! Bounded activity log.
//!
//! Entries are stored oldest-first and displayed newest-first. Once the log
//! holds [`LOG_CAPACITY`] entries, each append drops the oldest one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of retained entries.
pub const LOG_CAPACITY: usize = 50;

/// Timestamp format used for display and in rendered artifacts.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.time.format(TIME_FORMAT), self.message)
    }
}

/// Append-only ring of the most recent [`LOG_CAPACITY`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
}

impl ActivityLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from stored entries (oldest first), keeping the newest
    /// [`LOG_CAPACITY`].
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        let skip = entries.len().saturating_sub(LOG_CAPACITY);
        Self {
            entries: entries.into_iter().skip(skip).collect(),
        }
    }

    /// Restore a log from its JSON form, starting fresh on bad data.
    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<Vec<LogEntry>>(json) {
            Ok(entries) => Self::from_entries(entries),
            Err(e) => {
                log::warn!("Discarding unreadable activity log: {}", e);
                Self::new()
            }
        }
    }

    /// Serialize to JSON (oldest first).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Append a message stamped with the current time.
    pub fn append(&mut self, message: impl Into<String>) {
        self.append_at(Utc::now(), message);
    }

    /// Append a message with an explicit timestamp.
    pub fn append_at(&mut self, time: DateTime<Utc>, message: impl Into<String>) {
        while self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            time,
            message: message.into(),
        });
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in storage order (oldest first).
    pub fn oldest_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries in display order (newest first).
    pub fn newest_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}
