//! Option store and cache collaborators.
//!
//! The orchestrator persists everything through two small traits: a
//! key/value [`OptionStore`] for settings, status and the activity log, and a
//! TTL [`Cache`] for the display snapshot of the allow list. JSON-file
//! implementations back the CLI; in-memory ones back tests and embedders.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Persistent key/value settings store.
pub trait OptionStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Read a value, falling back to `default`.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Short-lived cache with per-entry expiry.
pub trait Cache: Send + Sync {
    /// Read an unexpired value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value that expires after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Write `data` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the target.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    // Keep the permissions of the file being replaced.
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn load_json_map<T>(path: &Path) -> Result<BTreeMap<String, T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Reload `map` from disk, keeping the last good copy if the file is
/// unreadable.
fn refresh<T>(path: &Path, map: &mut BTreeMap<String, T>)
where
    T: for<'de> Deserialize<'de>,
{
    match load_json_map(path) {
        Ok(fresh) => *map = fresh,
        Err(e) => log::warn!("Failed to reload {}: {}", path.display(), e),
    }
}

fn save_json_map<T: Serialize>(path: &Path, map: &BTreeMap<String, T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(map)?;
    atomic_write(path, content.as_bytes())?;
    Ok(())
}

/// Option store backed by a single JSON object on disk.
///
/// Every read and write reloads the file first, so two stores (or two
/// processes) on one path only ever overwrite the keys they change.
pub struct JsonOptionStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonOptionStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = load_json_map(&path)?;
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OptionStore for JsonOptionStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut values = self.values.lock();
        refresh(&self.path, &mut values);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock();
        *values = load_json_map(&self.path)?;
        values.insert(key.to_string(), value.to_string());
        save_json_map(&self.path, &values)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        *values = load_json_map(&self.path)?;
        if values.remove(key).is_some() {
            save_json_map(&self.path, &values)?;
        }
        Ok(())
    }
}

/// In-memory option store.
#[derive(Default)]
pub struct MemoryOptionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryOptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl OptionStore for MemoryOptionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// On-disk cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    value: String,
    /// Expiry as seconds since the Unix epoch
    expires_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Cache backed by a JSON file, surviving process restarts.
pub struct JsonCache {
    path: PathBuf,
    records: Mutex<BTreeMap<String, CacheRecord>>,
}

impl JsonCache {
    /// Open (or lazily create) the cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = load_json_map(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }
}

impl Cache for JsonCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut records = self.records.lock();
        refresh(&self.path, &mut records);
        records
            .get(key)
            .filter(|r| unix_now() < r.expires_at)
            .map(|r| r.value.clone())
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut records = self.records.lock();
        *records = load_json_map(&self.path)?;
        let now = unix_now();
        records.retain(|_, r| now < r.expires_at);
        records.insert(
            key.to_string(),
            CacheRecord {
                value: value.to_string(),
                expires_at: now.saturating_add(ttl.as_secs()),
            },
        );
        save_json_map(&self.path, &records)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock();
        *records = load_json_map(&self.path)?;
        if records.remove(key).is_some() {
            save_json_map(&self.path, &records)?;
        }
        Ok(())
    }
}

/// In-memory cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(value, _)| value.clone())
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_option_store() {
        let store = MemoryOptionStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.get_or("missing", "fallback"), "fallback");

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k"), Some("v".to_string()));
        assert_eq!(store.len(), 1);

        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_option_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("options.json");

        let store = JsonOptionStore::open(&path).unwrap();
        store.set("xmlrpc_whitelist_enabled", "1").unwrap();
        store.set("xmlrpc_whitelist_custom_ips", "1.2.3.4").unwrap();
        store.delete("xmlrpc_whitelist_custom_ips").unwrap();
        assert_eq!(store.path(), path.as_path());

        let reopened = JsonOptionStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("xmlrpc_whitelist_enabled"),
            Some("1".to_string())
        );
        assert_eq!(reopened.get("xmlrpc_whitelist_custom_ips"), None);
    }

    #[test]
    fn test_json_option_store_missing_file() {
        let dir = tempdir().unwrap();
        let store = JsonOptionStore::open(dir.path().join("none.json")).unwrap();
        assert_eq!(store.get("anything"), None);
    }

    #[test]
    fn test_two_stores_on_one_file_keep_each_others_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("options.json");

        // Both opened before either writes, like two overlapping commands
        let cron = JsonOptionStore::open(&path).unwrap();
        let admin = JsonOptionStore::open(&path).unwrap();

        admin.set("xmlrpc_whitelist_custom_ips", "1.2.3.4").unwrap();
        cron.set("xmlrpc_whitelist_log", "[]").unwrap();
        assert_eq!(
            cron.get("xmlrpc_whitelist_custom_ips"),
            Some("1.2.3.4".to_string())
        );

        admin.set("xmlrpc_whitelist_enabled", "0").unwrap();
        cron.delete("xmlrpc_whitelist_log").unwrap();

        let reopened = JsonOptionStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("xmlrpc_whitelist_custom_ips"),
            Some("1.2.3.4".to_string())
        );
        assert_eq!(reopened.get("xmlrpc_whitelist_enabled"), Some("0".to_string()));
        assert_eq!(reopened.get("xmlrpc_whitelist_log"), None);
    }

    #[test]
    fn test_two_caches_on_one_file_keep_each_others_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let first = JsonCache::open(&path).unwrap();
        let second = JsonCache::open(&path).unwrap();

        first.set("a", "1", Duration::from_secs(3600)).unwrap();
        second.set("b", "2", Duration::from_secs(3600)).unwrap();

        let reopened = JsonCache::open(&path).unwrap();
        assert_eq!(reopened.get("a"), Some("1".to_string()));
        assert_eq!(reopened.get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_memory_cache_ttl() {
        let cache = MemoryCache::new();
        cache.set("live", "value", Duration::from_secs(3600)).unwrap();
        cache.set("dead", "value", Duration::ZERO).unwrap();

        assert_eq!(cache.get("live"), Some("value".to_string()));
        assert_eq!(cache.get("dead"), None);

        cache.delete("live").unwrap();
        assert_eq!(cache.get("live"), None);
    }

    #[test]
    fn test_json_cache_persists_and_expires() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = JsonCache::open(&path).unwrap();
        cache.set("ips", "[\"1.1.1.1\"]", Duration::from_secs(3600)).unwrap();
        cache.set("stale", "x", Duration::ZERO).unwrap();

        let reopened = JsonCache::open(&path).unwrap();
        assert_eq!(reopened.get("ips"), Some("[\"1.1.1.1\"]".to_string()));
        assert_eq!(reopened.get("stale"), None);
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "old").unwrap();

        atomic_write(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        // No temp files left behind
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }
}
