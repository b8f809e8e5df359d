//! xmlrpc-allowlist - Keep `xmlrpc.php` reachable only from trusted addresses.
//!
//! This crate periodically fetches a remote list of IPv4 addresses and CIDR
//! ranges, validates it, merges it with administrator-supplied entries, and
//! renders web server access rules that allow only those sources to reach
//! the XML-RPC endpoint.
//!
//! # Features
//!
//! - **Strict validation**: dotted-decimal IPv4 with an optional `/0`..`/32` prefix
//! - **Feed sanity gate**: a suspicious feed never replaces a working allow list
//! - **Stable merging**: remote entries first, then custom ones, deduplicated in order
//! - **Apache and nginx rules**: `.htaccess` blocks are applied in place,
//!   nginx snippets are produced for manual installation
//! - **Bounded activity log**: the 50 most recent sync events are kept
//!
//! # Quick Start
//!
//! ```
//! use xmlrpc_allowlist::{validate, AllowList};
//!
//! assert!(validate("192.0.64.0/18"));
//! assert!(!validate("192.0.64.0/33"));
//!
//! let list = AllowList::merge(&["192.0.64.0/18"], &["1.2.3.4", "bogus"]);
//! assert_eq!(list.entries(), ["192.0.64.0/18", "1.2.3.4"]);
//! ```
//!
//! # Sync Cycles
//!
//! [`SyncOrchestrator`] runs the whole cycle against injected collaborators:
//!
//! ```ignore
//! use std::sync::Arc;
//! use xmlrpc_allowlist::{
//!     AppConfig, FsArtifactWriter, HttpFetcher, JsonCache, JsonOptionStore, SyncOrchestrator,
//! };
//!
//! let config = AppConfig::load("/etc/xmlrpc-allowlist.yaml")?;
//! let orchestrator = SyncOrchestrator::new(
//!     Arc::new(HttpFetcher::new()),
//!     Arc::new(JsonOptionStore::open(config.options_path())?),
//!     Arc::new(JsonCache::open(config.cache_path())?),
//!     Arc::new(FsArtifactWriter),
//! )
//! .with_detector(config.detector())
//! .with_settings(config.sync_settings());
//!
//! // Daily trigger
//! if let Some(outcome) = orchestrator.sync_if_due(config.sync_interval())? {
//!     println!("{}", outcome);
//! }
//! ```
//!
//! A failed cycle leaves the previous rules in force; the failure is only
//! visible in the activity log and the stored status.

mod activity;
mod address;
mod allowlist;
mod artifact;
mod config;
mod error;
mod fetcher;
mod lock;
mod status;
mod store;
mod sync;
mod target;

pub mod feed;
pub mod render;

// Re-export core types
pub use address::{validate, validate_opt, AddressEntry, MAX_PREFIX_LEN};
pub use allowlist::{custom_entries, AllowList};
pub use error::{AddressError, Error, Result, SanityError, SyncFailure};

// Re-export the activity log
pub use activity::{ActivityLog, LogEntry, LOG_CAPACITY, TIME_FORMAT};

// Re-export configuration
pub use config::{keys, AppConfig, SyncSettings, DEFAULT_IP_SOURCE, DEFAULT_MARKER};

// Re-export collaborators
pub use artifact::{extract_block, splice_block, ArtifactWriter, FsArtifactWriter};
pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, TransportError, DEFAULT_FETCH_TIMEOUT};
pub use lock::{StateLock, LOCK_FILE};
pub use store::{Cache, JsonCache, JsonOptionStore, MemoryCache, MemoryOptionStore, OptionStore};
pub use target::{FixedTarget, ServerSoftwareProbe, TargetDetector, TargetKind};

// Re-export orchestration
pub use status::{LastStatus, StatusReport, SyncStatus};
pub use sync::{DegradedReason, ManualCause, SyncOrchestrator, SyncOutcome, SyncState};
