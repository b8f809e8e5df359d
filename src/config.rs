//! Configuration: the YAML application file and option-store keys.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::target::{FixedTarget, ServerSoftwareProbe, TargetDetector, TargetKind};

/// Default remote IP list.
pub const DEFAULT_IP_SOURCE: &str = "https://jetpack.com/ips-v4.txt";

/// Default marker name for the config block.
pub const DEFAULT_MARKER: &str = "Whitelist XML-RPC";

/// Option-store keys.
pub mod keys {
    /// Prefix shared by every key.
    pub const PREFIX: &str = "xmlrpc_whitelist_";

    pub const ENABLED: &str = "xmlrpc_whitelist_enabled";
    pub const IP_SOURCE: &str = "xmlrpc_whitelist_ip_source";
    pub const CUSTOM_IPS: &str = "xmlrpc_whitelist_custom_ips";
    pub const LAST_SYNC: &str = "xmlrpc_whitelist_last_sync";
    pub const LAST_IP_COUNT: &str = "xmlrpc_whitelist_last_ip_count";
    pub const LAST_STATUS: &str = "xmlrpc_whitelist_last_status";
    pub const LOG: &str = "xmlrpc_whitelist_log";

    /// Cache key of the display snapshot.
    pub const CACHED_IPS: &str = "xmlrpc_whitelist_cached_ips";

    /// Every option key, for uninstall.
    pub const ALL: &[&str] = &[
        ENABLED,
        IP_SOURCE,
        CUSTOM_IPS,
        LAST_SYNC,
        LAST_IP_COUNT,
        LAST_STATUS,
        LOG,
    ];
}

/// Application configuration, read from YAML.
///
/// Every field has a default, so a missing file or an empty document yields
/// a working configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `options.json` and `cache.json`
    pub state_dir: PathBuf,
    /// The `.htaccess` file the Apache block is written into
    pub htaccess_path: PathBuf,
    /// Marker name for the block
    pub marker: String,
    /// Remote fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Verify TLS certificates of the feed host
    pub verify_tls: bool,
    /// Lifetime of the display snapshot in seconds
    pub cache_ttl_secs: u64,
    /// `auto`, `apache` or `nginx`
    pub target: String,
    /// Minimum time between scheduled syncs in seconds
    pub sync_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/xmlrpc-allowlist"),
            htaccess_path: PathBuf::from(".htaccess"),
            marker: DEFAULT_MARKER.to_string(),
            fetch_timeout_secs: 30,
            verify_tls: true,
            cache_ttl_secs: 3600,
            target: "auto".to_string(),
            sync_interval_secs: 86400,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a sync meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.marker.trim().is_empty() {
            return Err(Error::Config("marker must not be empty".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config(
                "fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        let target = self.target.trim().to_lowercase();
        if target != "auto" && target.parse::<TargetKind>().is_err() {
            return Err(Error::Config(format!(
                "unknown target '{}' (expected auto, apache or nginx)",
                self.target
            )));
        }
        Ok(())
    }

    /// Path of the option store file.
    pub fn options_path(&self) -> PathBuf {
        self.state_dir.join("options.json")
    }

    /// Path of the cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.state_dir.join("cache.json")
    }

    /// Fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Display snapshot lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Scheduled sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Build the target detector: a fixed target, or a probe of
    /// `SERVER_SOFTWARE` for `auto`.
    pub fn detector(&self) -> Box<dyn TargetDetector> {
        match self.target.parse::<TargetKind>() {
            Ok(kind) => Box::new(FixedTarget(kind)),
            Err(()) => Box::new(ServerSoftwareProbe::from_env()),
        }
    }

    /// Orchestrator settings derived from this configuration.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            htaccess_path: self.htaccess_path.clone(),
            marker: self.marker.clone(),
            fetch_timeout: self.fetch_timeout(),
            verify_tls: self.verify_tls,
            cache_ttl: self.cache_ttl(),
        }
    }
}

/// Settings the orchestrator needs for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub htaccess_path: PathBuf,
    pub marker: String,
    pub fetch_timeout: Duration,
    pub verify_tls: bool,
    pub cache_ttl: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        AppConfig::default().sync_settings()
    }
}
