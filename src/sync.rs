//! Sync orchestration: fetch, validate, merge, render and persist.
//!
//! [`SyncOrchestrator`] is the only component that touches the option store,
//! the cache and the enforcement artifact. Everything below it (validation,
//! parsing, merging, rendering) is pure and returns data.
//!
//! A cycle walks through [`SyncState`]s and ends in `Done` or `Aborted`.
//! Each transition appends one activity-log entry; invalid feed lines add
//! their own warnings on top.

use chrono::Utc;
use log::Level;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::ActivityLog;
use crate::address;
use crate::allowlist::{custom_entries, AllowList};
use crate::artifact::ArtifactWriter;
use crate::config::{keys, SyncSettings, DEFAULT_IP_SOURCE};
use crate::error::{Error, Result, SyncFailure};
use crate::feed::{sanitize_custom, FeedParser, FeedSanityGate};
use crate::fetcher::Fetcher;
use crate::render::{renderer_for, wrap_with_markers, RenderMetadata, RenderedArtifact};
use crate::status::{LastStatus, StatusReport, SyncStatus};
use crate::store::{Cache, OptionStore};
use crate::target::{FixedTarget, TargetDetector, TargetKind};

/// Stage of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Fetching,
    Parsing,
    Gating,
    Merging,
    Rendering,
    Persisting,
    /// Finished with a success or degraded outcome
    Done,
    /// Finished with a failure
    Aborted,
}

impl SyncState {
    /// Check if the cycle has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Done | SyncState::Aborted)
    }
}

/// Why the rules could not be applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCause {
    /// nginx has no per-directory config file to edit
    NginxTarget,
    /// The `.htaccess` file does not exist
    ArtifactMissing,
    /// The `.htaccess` file exists but cannot be written
    ArtifactNotWritable,
}

impl fmt::Display for ManualCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualCause::NginxTarget => write!(f, "nginx detected"),
            ManualCause::ArtifactMissing => write!(f, ".htaccess file not found"),
            ManualCause::ArtifactNotWritable => write!(f, ".htaccess is not writable"),
        }
    }
}

/// Why a cycle ended degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// Rules were computed and cached, but someone has to install them.
    ManualStepRequired(ManualCause),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::ManualStepRequired(cause) => {
                write!(f, "manual step required ({})", cause)
            }
        }
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Allow list computed, cached and applied.
    Success {
        allow_list: AllowList,
        artifact: RenderedArtifact,
    },
    /// Allow list computed and cached; the artifact needs manual installation.
    Degraded {
        allow_list: AllowList,
        artifact: RenderedArtifact,
        reason: DegradedReason,
    },
    /// Cycle aborted; the previous allow list and artifact stay in force.
    Failure { reason: SyncFailure },
}

impl SyncOutcome {
    /// `true` for success and degraded outcomes.
    pub fn succeeded(&self) -> bool {
        !matches!(self, SyncOutcome::Failure { .. })
    }

    /// Check if the outcome is degraded.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SyncOutcome::Degraded { .. })
    }

    /// The computed allow list, if the cycle got that far.
    pub fn allow_list(&self) -> Option<&AllowList> {
        match self {
            SyncOutcome::Success { allow_list, .. } | SyncOutcome::Degraded { allow_list, .. } => {
                Some(allow_list)
            }
            SyncOutcome::Failure { .. } => None,
        }
    }

    /// The rendered artifact, if the cycle got that far.
    pub fn artifact(&self) -> Option<&RenderedArtifact> {
        match self {
            SyncOutcome::Success { artifact, .. } | SyncOutcome::Degraded { artifact, .. } => {
                Some(artifact)
            }
            SyncOutcome::Failure { .. } => None,
        }
    }

    /// The failure reason, if any.
    pub fn failure(&self) -> Option<&SyncFailure> {
        match self {
            SyncOutcome::Failure { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success { allow_list, .. } => {
                write!(f, "Synced {} IPs", allow_list.len())
            }
            SyncOutcome::Degraded {
                allow_list, reason, ..
            } => write!(f, "Synced {} IPs - {}", allow_list.len(), reason),
            SyncOutcome::Failure { reason } => write!(f, "{}", reason),
        }
    }
}

/// Clears the in-progress flag when a cycle ends, however it ends.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Activity log of one cycle plus its current state.
struct Cycle {
    state: SyncState,
    log: ActivityLog,
}

impl Cycle {
    fn new(log: ActivityLog) -> Self {
        Self {
            state: SyncState::Idle,
            log,
        }
    }

    /// Move to `to`, appending one entry.
    fn advance(&mut self, to: SyncState, level: Level, message: impl Into<String>) {
        log::trace!("sync: {:?} -> {:?}", self.state, to);
        self.state = to;
        self.note(level, message);
    }

    /// Append an entry without changing state.
    fn note(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(level, "{}", message);
        self.log.append(message);
    }
}

/// Runs sync cycles against injected collaborators.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use xmlrpc_allowlist::{FsArtifactWriter, HttpFetcher, JsonCache, JsonOptionStore};
/// use xmlrpc_allowlist::SyncOrchestrator;
///
/// let orchestrator = SyncOrchestrator::new(
///     Arc::new(HttpFetcher::new()),
///     Arc::new(JsonOptionStore::open("/var/lib/xmlrpc-allowlist/options.json")?),
///     Arc::new(JsonCache::open("/var/lib/xmlrpc-allowlist/cache.json")?),
///     Arc::new(FsArtifactWriter),
/// );
///
/// let outcome = orchestrator.sync_cycle()?;
/// println!("{}", outcome);
/// ```
pub struct SyncOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    options: Arc<dyn OptionStore>,
    cache: Arc<dyn Cache>,
    writer: Arc<dyn ArtifactWriter>,
    detector: Box<dyn TargetDetector>,
    settings: SyncSettings,
    gate: FeedSanityGate,
    in_progress: AtomicBool,
}

impl SyncOrchestrator {
    /// Create an orchestrator with default settings, targeting Apache.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        options: Arc<dyn OptionStore>,
        cache: Arc<dyn Cache>,
        writer: Arc<dyn ArtifactWriter>,
    ) -> Self {
        Self {
            fetcher,
            options,
            cache,
            writer,
            detector: Box::new(FixedTarget(TargetKind::Apache)),
            settings: SyncSettings::default(),
            gate: FeedSanityGate::default(),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Use a different target detector.
    pub fn with_detector(mut self, detector: Box<dyn TargetDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Use different settings.
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use different sanity thresholds.
    pub fn with_gate(mut self, gate: FeedSanityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Current settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Effective target (never `Unknown`).
    pub fn target(&self) -> TargetKind {
        self.detector.detect().effective()
    }

    /// Check if syncing is administratively enabled.
    pub fn is_enabled(&self) -> bool {
        self.options.get(keys::ENABLED).as_deref() == Some("1")
    }

    /// Configured remote source.
    pub fn source_url(&self) -> String {
        self.options.get_or(keys::IP_SOURCE, DEFAULT_IP_SOURCE)
    }

    /// Configured custom entries, as stored.
    pub fn custom_ips(&self) -> String {
        self.options.get_or(keys::CUSTOM_IPS, "")
    }

    /// Persisted activity log.
    pub fn activity_log(&self) -> ActivityLog {
        self.options
            .get(keys::LOG)
            .map(|json| ActivityLog::from_json(&json))
            .unwrap_or_default()
    }

    /// Run one sync cycle.
    ///
    /// Every sync failure is reported as [`SyncOutcome::Failure`]; the only
    /// error is [`Error::SyncInProgress`] when another cycle is running.
    pub fn sync_cycle(&self) -> Result<SyncOutcome> {
        let _guard = CycleGuard::acquire(&self.in_progress).ok_or(Error::SyncInProgress)?;

        let mut cycle = Cycle::new(self.activity_log());
        let outcome = self.run(&mut cycle);
        debug_assert!(cycle.state.is_terminal());
        self.save_log(&cycle.log);

        Ok(outcome)
    }

    /// Run a cycle only if `interval` has passed since the last sync.
    pub fn sync_if_due(&self, interval: Duration) -> Result<Option<SyncOutcome>> {
        let status = SyncStatus::load(self.options.as_ref());
        if !status.needs_sync(interval, Utc::now()) {
            log::debug!("Sync not due yet (last sync {:?})", status.last_sync);
            return Ok(None);
        }
        self.sync_cycle().map(Some)
    }

    fn run(&self, cycle: &mut Cycle) -> SyncOutcome {
        if !self.is_enabled() {
            return self.abort(cycle, SyncFailure::Disabled);
        }

        // Fetching
        cycle.advance(SyncState::Fetching, Level::Info, "Starting IP sync...");
        let source = self.source_url();
        let body = match self.fetch(&source) {
            Ok(body) => body,
            Err(reason) => return self.abort(cycle, reason),
        };

        // Parsing
        cycle.advance(
            SyncState::Parsing,
            Level::Info,
            format!("Fetched {} bytes from {}", body.len(), source),
        );
        let parsed = FeedParser::parse(&body);
        for warning in &parsed.warnings {
            cycle.note(Level::Warn, warning.message());
        }

        // Gating
        cycle.advance(
            SyncState::Gating,
            Level::Info,
            format!(
                "Parsed {} valid and {} invalid IPs",
                parsed.valid_count(),
                parsed.invalid_count
            ),
        );
        if let Err(e) = self.gate.check(&parsed) {
            return self.abort(cycle, e.into());
        }

        // Merging
        cycle.advance(SyncState::Merging, Level::Info, "Sanity check passed");
        let remote = parsed.valid_literals();
        let custom = custom_entries(&self.custom_ips());
        let allow_list = AllowList::merge(&remote, &custom);
        if allow_list.is_empty() {
            return self.abort(cycle, SyncFailure::NoValidIps);
        }

        // Rendering
        let custom_valid = custom.iter().filter(|c| address::validate(c)).count();
        cycle.advance(
            SyncState::Rendering,
            Level::Info,
            format!(
                "Merged {} unique IPs ({} remote, {} custom)",
                allow_list.len(),
                remote.len(),
                custom_valid
            ),
        );
        let kind = self.target();
        let meta = RenderMetadata::now(source);
        let lines = renderer_for(kind).render_lines(&allow_list, &meta);

        // Persisting
        cycle.advance(
            SyncState::Persisting,
            Level::Info,
            format!("Rendered {} rules ({} lines)", kind, lines.len()),
        );
        self.persist(cycle, allow_list, kind, lines)
    }

    fn fetch(&self, url: &str) -> std::result::Result<String, SyncFailure> {
        let response = self
            .fetcher
            .fetch(url, self.settings.fetch_timeout, self.settings.verify_tls)
            .map_err(|e| SyncFailure::FetchError {
                cause: e.to_string(),
            })?;

        if response.status != 200 {
            return Err(SyncFailure::FetchError {
                cause: format!("IP source returned HTTP {}", response.status),
            });
        }
        if response.body.is_empty() {
            return Err(SyncFailure::FetchError {
                cause: "Empty response from IP source".to_string(),
            });
        }
        Ok(response.body)
    }

    /// Cache first, then the artifact, then the status fields.
    fn persist(
        &self,
        cycle: &mut Cycle,
        allow_list: AllowList,
        kind: TargetKind,
        lines: Vec<String>,
    ) -> SyncOutcome {
        self.write_cache(cycle, &allow_list);
        let count = allow_list.len();

        if let Some(cause) = self.manual_cause(kind) {
            self.record_sync(count, LastStatus::Degraded);
            cycle.advance(
                SyncState::Done,
                Level::Warn,
                format!(
                    "WARNING: {} - rules for {} IPs must be applied manually",
                    cause, count
                ),
            );
            return SyncOutcome::Degraded {
                allow_list,
                artifact: RenderedArtifact {
                    kind,
                    lines,
                    applied: false,
                },
                reason: DegradedReason::ManualStepRequired(cause),
            };
        }

        let written = self.writer.write_marked_block(
            &self.settings.htaccess_path,
            &self.settings.marker,
            &lines,
        );
        match written {
            Ok(()) => {
                self.record_sync(count, LastStatus::Success);
                cycle.advance(
                    SyncState::Done,
                    Level::Info,
                    format!("Successfully updated .htaccess with {} IPs", count),
                );
                SyncOutcome::Success {
                    allow_list,
                    artifact: RenderedArtifact {
                        kind,
                        lines,
                        applied: true,
                    },
                }
            }
            Err(e) => self.abort(
                cycle,
                SyncFailure::ApplyError {
                    cause: e.to_string(),
                },
            ),
        }
    }

    /// Why rules for `kind` cannot be written directly, if they cannot.
    fn manual_cause(&self, kind: TargetKind) -> Option<ManualCause> {
        if !kind.supports_direct_apply() {
            return Some(ManualCause::NginxTarget);
        }
        let path = &self.settings.htaccess_path;
        if !self.writer.path_exists(path) {
            Some(ManualCause::ArtifactMissing)
        } else if !self.writer.is_writable(path) {
            Some(ManualCause::ArtifactNotWritable)
        } else {
            None
        }
    }

    fn abort(&self, cycle: &mut Cycle, reason: SyncFailure) -> SyncOutcome {
        if reason == SyncFailure::Disabled {
            cycle.advance(SyncState::Aborted, Level::Info, reason.to_string());
        } else {
            self.record_status(LastStatus::Error);
            cycle.advance(SyncState::Aborted, Level::Error, format!("ERROR: {}", reason));
        }
        SyncOutcome::Failure { reason }
    }

    fn write_cache(&self, cycle: &mut Cycle, allow_list: &AllowList) {
        let stored = serde_json::to_string(allow_list)
            .map_err(Error::from)
            .and_then(|json| {
                self.cache
                    .set(keys::CACHED_IPS, &json, self.settings.cache_ttl)
            });
        if let Err(e) = stored {
            cycle.note(Level::Warn, format!("WARNING: Failed to cache IPs - {}", e));
        }
    }

    fn record_sync(&self, count: usize, status: LastStatus) {
        if let Err(e) = SyncStatus::record_sync(self.options.as_ref(), Utc::now(), count, status) {
            log::error!("Failed to record sync status: {}", e);
        }
    }

    fn record_status(&self, status: LastStatus) {
        if let Err(e) = SyncStatus::record_status(self.options.as_ref(), status) {
            log::error!("Failed to record sync status: {}", e);
        }
    }

    fn save_log(&self, log: &ActivityLog) {
        let saved = log
            .to_json()
            .map_err(Error::from)
            .and_then(|json| self.options.set(keys::LOG, &json));
        if let Err(e) = saved {
            log::error!("Failed to save activity log: {}", e);
        }
    }

    /// Append one entry to the persisted activity log outside a cycle.
    fn record(&self, level: Level, message: impl Into<String>) {
        let mut activity = self.activity_log();
        let message = message.into();
        log::log!(level, "{}", message);
        activity.append(message);
        self.save_log(&activity);
    }

    // ==================== Lifecycle ====================

    /// First-time setup: seed the enabled flag and source when unset, then
    /// sync.
    pub fn activate(&self) -> Result<SyncOutcome> {
        self.seed_defaults()?;
        self.sync_cycle()
    }

    fn seed_defaults(&self) -> Result<()> {
        if self.options.get(keys::ENABLED).is_none() {
            self.options.set(keys::ENABLED, "1")?;
        }
        if self.options.get(keys::IP_SOURCE).is_none() {
            self.options.set(keys::IP_SOURCE, DEFAULT_IP_SOURCE)?;
        }
        Ok(())
    }

    /// Remove the rules from the artifact. Returns `true` if a block was
    /// removed.
    ///
    /// Fails with [`Error::SyncInProgress`] while a cycle is running.
    pub fn deactivate(&self) -> Result<bool> {
        let _guard = CycleGuard::acquire(&self.in_progress).ok_or(Error::SyncInProgress)?;
        self.remove_rules()
    }

    fn remove_rules(&self) -> Result<bool> {
        if !self.artifact_writable() {
            return Ok(false);
        }
        let removed = self
            .writer
            .remove_marked_block(&self.settings.htaccess_path, &self.settings.marker)?;
        if removed {
            self.record(Level::Info, "Removed .htaccess rules (plugin deactivated)");
        }
        Ok(removed)
    }

    /// Delete every stored option, the cached snapshot, and the rules.
    pub fn uninstall(&self) -> Result<()> {
        let _guard = CycleGuard::acquire(&self.in_progress).ok_or(Error::SyncInProgress)?;
        for key in keys::ALL {
            self.options.delete(key)?;
        }
        self.cache.delete(keys::CACHED_IPS)?;
        if self.artifact_writable() {
            self.writer
                .remove_marked_block(&self.settings.htaccess_path, &self.settings.marker)?;
        }
        log::info!("Removed all xmlrpc allow-list data");
        Ok(())
    }

    // ==================== Settings ====================

    /// Turn syncing on (and sync) or off (and remove the rules).
    pub fn set_enabled(&self, enabled: bool) -> Result<Option<SyncOutcome>> {
        if enabled {
            self.options.set(keys::ENABLED, "1")?;
            self.seed_defaults()?;
            self.sync_cycle().map(Some)
        } else {
            let _guard = CycleGuard::acquire(&self.in_progress).ok_or(Error::SyncInProgress)?;
            self.options.set(keys::ENABLED, "0")?;
            self.remove_rules()?;
            Ok(None)
        }
    }

    /// Change the remote source and sync.
    pub fn set_source(&self, url: &str) -> Result<SyncOutcome> {
        let url = url.trim();
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid IP source URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "IP source must be an http(s) URL: {}",
                url
            )));
        }
        self.options.set(keys::IP_SOURCE, url)?;
        self.sync_cycle()
    }

    /// Replace the custom entries (invalid lines are dropped) and sync.
    pub fn set_custom(&self, raw: &str) -> Result<SyncOutcome> {
        let cleaned = sanitize_custom(raw);
        self.options.set(keys::CUSTOM_IPS, &cleaned)?;
        self.sync_cycle()
    }

    // ==================== Display ====================

    /// The cached allow list, or the valid custom entries when the cache is
    /// empty or expired. Never fetches.
    pub fn cached_ips_for_display(&self) -> AllowList {
        if let Some(list) = self.cached_allow_list() {
            return list;
        }
        let custom = custom_entries(&self.custom_ips());
        AllowList::merge::<&str, String>(&[], &custom)
    }

    fn cached_allow_list(&self) -> Option<AllowList> {
        let json = self.cache.get(keys::CACHED_IPS)?;
        match serde_json::from_str(&json) {
            Ok(list) => Some(list),
            Err(e) => {
                log::warn!("Ignoring unreadable cached IPs: {}", e);
                None
            }
        }
    }

    /// Marker-wrapped rules for manual installation, or an empty string when
    /// there is nothing to allow.
    pub fn manual_rules(&self, kind: TargetKind) -> String {
        let allow_list = self.cached_ips_for_display();
        if allow_list.is_empty() {
            return String::new();
        }
        let meta = RenderMetadata::now(self.source_url());
        let lines = renderer_for(kind).render_lines(&allow_list, &meta);
        wrap_with_markers(&self.settings.marker, &lines)
    }

    /// Check that both block markers are present in the artifact.
    pub fn verify_applied(&self) -> bool {
        self.writer
            .read_marked_block(&self.settings.htaccess_path, &self.settings.marker)
            .is_some()
    }

    /// Check that the artifact exists and can be written.
    pub fn artifact_writable(&self) -> bool {
        let path = &self.settings.htaccess_path;
        self.writer.path_exists(path) && self.writer.is_writable(path)
    }

    /// Current status, with the next due time computed from `interval`.
    pub fn status(&self, interval: Duration) -> StatusReport {
        let sync = SyncStatus::load(self.options.as_ref());
        let next_due = sync.next_due(interval);
        StatusReport {
            enabled: self.is_enabled(),
            source_url: self.source_url(),
            target: self.target().to_string(),
            cached_ip_count: self.cached_allow_list().map(|l| l.len()),
            artifact_path: self.settings.htaccess_path.clone(),
            artifact_writable: self.artifact_writable(),
            rules_applied: self.verify_applied(),
            next_due,
            sync,
        }
    }
}
