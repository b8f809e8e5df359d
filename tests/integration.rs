//! End-to-end sync cycles against in-memory stores and a scripted feed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use xmlrpc_allowlist::feed::{FeedParser, FeedSanityGate};
use xmlrpc_allowlist::{
    keys, AllowList, ArtifactWriter, Cache, Error, FetchResponse, Fetcher, FsArtifactWriter,
    JsonCache, JsonOptionStore, LastStatus, MemoryCache, MemoryOptionStore, OptionStore,
    SanityError, StateLock, SyncFailure, SyncOrchestrator, SyncOutcome, SyncSettings, SyncStatus,
    TransportError, LOG_CAPACITY,
};

const WORDPRESS_BLOCK: &str = "# BEGIN WordPress\nRewriteEngine On\n# END WordPress\n";

const FIVE_CIDRS: &str = "192.0.64.0/18\n198.181.116.0/22\n66.135.48.128/25\n\
                          66.155.8.0/22\n76.74.248.128/25\n";

/// Fetcher returning queued responses in order, repeating the last one.
struct ScriptedFetcher {
    responses: Mutex<Vec<Result<FetchResponse, TransportError>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn new(responses: Vec<Result<FetchResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            urls: Mutex::new(Vec::new()),
        })
    }

    fn body(body: &str) -> Arc<Self> {
        Self::new(vec![Ok(FetchResponse::new(200, body))])
    }

    fn requested(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
        _verify_tls: bool,
    ) -> Result<FetchResponse, TransportError> {
        self.urls.lock().push(url.to_string());
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        }
    }
}

struct Site {
    dir: TempDir,
    options: Arc<MemoryOptionStore>,
    cache: Arc<MemoryCache>,
}

impl Site {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".htaccess"), WORDPRESS_BLOCK).unwrap();

        let options = Arc::new(MemoryOptionStore::new());
        options.set(keys::ENABLED, "1").unwrap();

        Self {
            dir,
            options,
            cache: Arc::new(MemoryCache::new()),
        }
    }

    fn htaccess(&self) -> PathBuf {
        self.dir.path().join(".htaccess")
    }

    fn orchestrator(&self, fetcher: Arc<dyn Fetcher>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            fetcher,
            self.options.clone(),
            self.cache.clone(),
            Arc::new(FsArtifactWriter),
        )
        .with_settings(SyncSettings {
            htaccess_path: self.htaccess(),
            ..SyncSettings::default()
        })
    }

    fn read_htaccess(&self) -> String {
        fs::read_to_string(self.htaccess()).unwrap()
    }
}

fn require_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| l.starts_with("Require ip "))
        .collect()
}

#[test]
fn test_below_threshold_feed_aborts() {
    let raw = "10.0.0.0/8\n192.168.1.1\n# comment\n\nbad.ip\n";

    let parsed = FeedParser::parse(raw);
    assert_eq!(parsed.valid_literals(), ["10.0.0.0/8", "192.168.1.1"]);
    assert_eq!(parsed.invalid_count, 1);
    assert_eq!(
        FeedSanityGate::default().check(&parsed),
        Err(SanityError::TooFewValid { valid: 2 })
    );

    let site = Site::new();
    let orchestrator = site.orchestrator(ScriptedFetcher::body(raw));
    let outcome = orchestrator.sync_cycle().unwrap();

    assert!(!outcome.succeeded());
    assert_eq!(
        outcome.failure(),
        Some(&SyncFailure::SanityTooFewValid { valid: 2 })
    );
    assert_eq!(site.read_htaccess(), WORDPRESS_BLOCK);
    assert!(site.cache.get(keys::CACHED_IPS).is_none());

    let log = orchestrator.activity_log();
    assert!(log
        .oldest_first()
        .any(|e| e.message == "WARNING: Skipping invalid IP: bad.ip"));
    assert_eq!(
        log.last().unwrap().message,
        "ERROR: Too few valid IPs (2) - aborting"
    );
}

#[test]
fn test_five_cidrs_plus_custom() {
    let site = Site::new();
    site.options.set(keys::CUSTOM_IPS, "1.2.3.4").unwrap();
    let orchestrator = site.orchestrator(ScriptedFetcher::body(FIVE_CIDRS));

    let outcome = orchestrator.sync_cycle().unwrap();
    let SyncOutcome::Success {
        allow_list,
        artifact,
    } = &outcome
    else {
        panic!("expected success, got {:?}", outcome);
    };

    assert_eq!(
        allow_list.entries(),
        [
            "192.0.64.0/18",
            "198.181.116.0/22",
            "66.135.48.128/25",
            "66.155.8.0/22",
            "76.74.248.128/25",
            "1.2.3.4"
        ]
    );
    assert!(artifact.applied);
    assert_eq!(require_lines(&artifact.lines.join("\n")).len(), 6);

    let content = site.read_htaccess();
    assert!(content.starts_with(WORDPRESS_BLOCK));
    assert_eq!(require_lines(&content).len(), 6);
    assert!(content.contains("<Files \"xmlrpc.php\">"));
    assert!(content.contains("ErrorDocument 403 \"Forbidden\""));
    assert!(content.trim_end().ends_with("# END Whitelist XML-RPC"));

    let status = SyncStatus::load(site.options.as_ref());
    assert_eq!(status.last_status, LastStatus::Success);
    assert_eq!(status.last_ip_count, 6);
    assert_eq!(orchestrator.cached_ips_for_display(), *allow_list);
}

#[test]
fn test_http_500_keeps_previous_rules() {
    let site = Site::new();
    let fetcher = ScriptedFetcher::new(vec![
        Ok(FetchResponse::new(200, FIVE_CIDRS)),
        Ok(FetchResponse::new(500, "Internal Server Error")),
    ]);
    let orchestrator = site.orchestrator(fetcher);

    assert!(orchestrator.sync_cycle().unwrap().succeeded());
    let htaccess_before = site.read_htaccess();
    let cache_before = site.cache.get(keys::CACHED_IPS);
    let log_before = orchestrator.activity_log().len();

    let outcome = orchestrator.sync_cycle().unwrap();
    assert!(matches!(
        outcome.failure(),
        Some(SyncFailure::FetchError { cause }) if cause.contains("500")
    ));

    assert_eq!(site.read_htaccess(), htaccess_before);
    assert_eq!(site.cache.get(keys::CACHED_IPS), cache_before);
    assert_eq!(
        SyncStatus::load(site.options.as_ref()).last_status,
        LastStatus::Error
    );

    let log = orchestrator.activity_log();
    let new_entries: Vec<_> = log.oldest_first().skip(log_before).collect();
    let mentioning_500: Vec<_> = new_entries
        .iter()
        .filter(|e| e.message.contains("500"))
        .collect();
    assert_eq!(mentioning_500.len(), 1);
    assert_eq!(
        mentioning_500[0].message,
        "ERROR: Failed to fetch IPs - IP source returned HTTP 500"
    );
}

#[test]
fn test_resync_replaces_block_in_place() {
    let site = Site::new();
    let fetcher = ScriptedFetcher::new(vec![
        Ok(FetchResponse::new(200, FIVE_CIDRS)),
        Ok(FetchResponse::new(
            200,
            "192.0.64.0/18\n198.181.116.0/22\n66.155.8.0/22\n",
        )),
    ]);
    let orchestrator = site.orchestrator(fetcher);

    orchestrator.sync_cycle().unwrap();
    fs::write(
        site.htaccess(),
        format!("{}# trailing rule\n", site.read_htaccess()),
    )
    .unwrap();
    orchestrator.sync_cycle().unwrap();

    let content = site.read_htaccess();
    assert_eq!(content.matches("# BEGIN Whitelist XML-RPC").count(), 1);
    assert_eq!(require_lines(&content).len(), 3);
    assert!(content.starts_with(WORDPRESS_BLOCK));
    assert!(content.ends_with("# trailing rule\n"));
}

#[test]
fn test_log_is_capped() {
    let site = Site::new();
    let orchestrator = site.orchestrator(ScriptedFetcher::body(FIVE_CIDRS));

    for _ in 0..10 {
        orchestrator.sync_cycle().unwrap();
    }

    let log = orchestrator.activity_log();
    assert_eq!(log.len(), LOG_CAPACITY);
    assert_eq!(
        log.newest_first().next().unwrap().message,
        "Successfully updated .htaccess with 5 IPs"
    );
}

#[test]
fn test_source_url_is_used() {
    let site = Site::new();
    let fetcher = ScriptedFetcher::body(FIVE_CIDRS);
    let orchestrator = site.orchestrator(fetcher.clone());

    orchestrator.sync_cycle().unwrap();
    orchestrator
        .set_source("https://ips.example.net/v4.txt")
        .unwrap();

    assert_eq!(
        fetcher.requested(),
        [
            "https://jetpack.com/ips-v4.txt",
            "https://ips.example.net/v4.txt"
        ]
    );
    assert!(site
        .read_htaccess()
        .contains("# Source: https://ips.example.net/v4.txt"));
}

#[test]
fn test_unwritable_htaccess_is_degraded() {
    struct ReadOnly;

    impl ArtifactWriter for ReadOnly {
        fn path_exists(&self, _: &Path) -> bool {
            true
        }
        fn is_writable(&self, _: &Path) -> bool {
            false
        }
        fn write_marked_block(
            &self,
            _: &Path,
            _: &str,
            _: &[String],
        ) -> xmlrpc_allowlist::Result<()> {
            panic!("write attempted on a read-only artifact");
        }
        fn remove_marked_block(&self, _: &Path, _: &str) -> xmlrpc_allowlist::Result<bool> {
            panic!("write attempted on a read-only artifact");
        }
        fn read_marked_block(&self, _: &Path, _: &str) -> Option<Vec<String>> {
            None
        }
    }

    let site = Site::new();
    let orchestrator = SyncOrchestrator::new(
        ScriptedFetcher::body(FIVE_CIDRS),
        site.options.clone(),
        site.cache.clone(),
        Arc::new(ReadOnly),
    );

    let outcome = orchestrator.sync_cycle().unwrap();
    assert!(outcome.succeeded());
    assert!(outcome.is_degraded());
    assert!(!outcome.artifact().unwrap().applied);
    assert_eq!(
        SyncStatus::load(site.options.as_ref()).last_status,
        LastStatus::Degraded
    );
    assert_eq!(orchestrator.cached_ips_for_display().len(), 5);

    // Nothing to remove on a read-only artifact
    assert!(!orchestrator.deactivate().unwrap());
}

#[test]
fn test_json_stores_survive_restart() {
    let site = Site::new();
    let state = site.dir.path().join("state");
    let build = || {
        SyncOrchestrator::new(
            ScriptedFetcher::body(FIVE_CIDRS),
            Arc::new(JsonOptionStore::open(state.join("options.json")).unwrap()),
            Arc::new(JsonCache::open(state.join("cache.json")).unwrap()),
            Arc::new(FsArtifactWriter),
        )
        .with_settings(SyncSettings {
            htaccess_path: site.htaccess(),
            ..SyncSettings::default()
        })
    };

    let first = build();
    assert!(first.activate().unwrap().succeeded());
    drop(first);

    let second = build();
    assert!(second.is_enabled());
    assert_eq!(second.cached_ips_for_display().len(), 5);
    assert_eq!(second.activity_log().len(), 7);
    assert!(second.verify_applied());

    let allowed: AllowList = second.cached_ips_for_display();
    assert!(allowed.permits("192.0.100.1".parse().unwrap()));
    assert!(!allowed.permits("8.8.8.8".parse().unwrap()));
}

#[test]
fn test_overlapping_commands_share_state() {
    let site = Site::new();
    let state = site.dir.path().join("state");
    let build = || {
        SyncOrchestrator::new(
            ScriptedFetcher::body(FIVE_CIDRS),
            Arc::new(JsonOptionStore::open(state.join("options.json")).unwrap()),
            Arc::new(JsonCache::open(state.join("cache.json")).unwrap()),
            Arc::new(FsArtifactWriter),
        )
        .with_settings(SyncSettings {
            htaccess_path: site.htaccess(),
            ..SyncSettings::default()
        })
    };

    assert!(build().activate().unwrap().succeeded());

    // A scheduled run and an administrator open the state at the same time
    let cron = build();
    let admin = build();
    {
        let _lock = StateLock::acquire(&state).unwrap();
        assert!(matches!(
            StateLock::try_acquire(&state),
            Err(Error::SyncInProgress)
        ));
        admin.set_enabled(false).unwrap();
    }

    let _lock = StateLock::try_acquire(&state).unwrap();
    let outcome = cron.sync_cycle().unwrap();
    assert_eq!(outcome.failure(), Some(&SyncFailure::Disabled));

    // The cron run neither re-enabled syncing nor restored the rules
    let after = build();
    assert!(!after.is_enabled());
    assert!(!after.verify_applied());
    assert!(!site.read_htaccess().contains("Require ip"));

    let messages: Vec<String> = after
        .activity_log()
        .newest_first()
        .map(|e| e.message.clone())
        .collect();
    assert_eq!(messages[0], "Sync skipped - disabled");
    assert_eq!(messages[1], "Removed .htaccess rules (plugin deactivated)");
}
