//! Persisted sync status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::activity::TIME_FORMAT;
use crate::config::keys;
use crate::error::Result;
use crate::store::OptionStore;

/// Result of the most recent sync, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LastStatus {
    /// Rules computed and applied
    Success,
    /// Rules computed and cached, manual step needed to enforce them
    Degraded,
    /// Cycle aborted
    Error,
    /// No sync recorded yet
    #[default]
    Unknown,
}

impl LastStatus {
    /// Parse a stored status (case-insensitive), `Unknown` otherwise.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "success" => LastStatus::Success,
            "degraded" => LastStatus::Degraded,
            "error" => LastStatus::Error,
            _ => LastStatus::Unknown,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LastStatus::Success => "success",
            LastStatus::Degraded => "degraded",
            LastStatus::Error => "error",
            LastStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last-sync metadata kept in the option store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_ip_count: usize,
    pub last_status: LastStatus,
}

impl SyncStatus {
    /// Load from the option store; missing or unreadable fields use defaults.
    pub fn load(store: &dyn OptionStore) -> Self {
        let last_sync = store
            .get(keys::LAST_SYNC)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc));
        let last_ip_count = store
            .get(keys::LAST_IP_COUNT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let last_status = store
            .get(keys::LAST_STATUS)
            .map(|s| LastStatus::from_str_lossy(&s))
            .unwrap_or_default();

        Self {
            last_sync,
            last_ip_count,
            last_status,
        }
    }

    /// Record a completed sync.
    pub fn record_sync(
        store: &dyn OptionStore,
        at: DateTime<Utc>,
        ip_count: usize,
        status: LastStatus,
    ) -> Result<()> {
        store.set(keys::LAST_SYNC, &at.to_rfc3339())?;
        store.set(keys::LAST_IP_COUNT, &ip_count.to_string())?;
        Self::record_status(store, status)
    }

    /// Record only the status field.
    pub fn record_status(store: &dyn OptionStore, status: LastStatus) -> Result<()> {
        store.set(keys::LAST_STATUS, status.as_str())
    }

    /// Check if a sync is due.
    ///
    /// Returns `true` if no sync is recorded or `interval` has elapsed since
    /// the last one.
    pub fn needs_sync(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= interval,
                // Last sync is in the future: clock went backwards.
                Err(_) => true,
            },
        }
    }

    /// When the next scheduled sync falls due.
    pub fn next_due(&self, interval: Duration) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(interval).ok()?;
        self.last_sync.map(|last| last + interval)
    }
}

/// Snapshot of everything an administrator looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub enabled: bool,
    pub source_url: String,
    /// Effective target (`apache` or `nginx`)
    pub target: String,
    #[serde(flatten)]
    pub sync: SyncStatus,
    /// Entries in the display snapshot, `None` if it has expired
    pub cached_ip_count: Option<usize>,
    pub artifact_path: PathBuf,
    pub artifact_writable: bool,
    /// Both block markers are present in the artifact
    pub rules_applied: bool,
    pub next_due: Option<DateTime<Utc>>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };

        writeln!(f, "Enabled:        {}", yes_no(self.enabled))?;
        writeln!(f, "IP source:      {}", self.source_url)?;
        writeln!(f, "Target:         {}", self.target)?;
        match self.sync.last_sync {
            Some(t) => writeln!(f, "Last sync:      {}", t.format(TIME_FORMAT))?,
            None => writeln!(f, "Last sync:      never")?,
        }
        writeln!(f, "Last status:    {}", self.sync.last_status)?;
        writeln!(f, "IP count:       {}", self.sync.last_ip_count)?;
        match self.cached_ip_count {
            Some(n) => writeln!(f, "Cached IPs:     {}", n)?,
            None => writeln!(f, "Cached IPs:     expired")?,
        }
        writeln!(
            f,
            "Artifact:       {} (writable: {}, rules applied: {})",
            self.artifact_path.display(),
            yes_no(self.artifact_writable),
            yes_no(self.rules_applied)
        )?;
        match self.next_due {
            Some(t) => write!(f, "Next sync:      {}", t.format(TIME_FORMAT)),
            None => write!(f, "Next sync:      on next trigger"),
        }
    }
}
