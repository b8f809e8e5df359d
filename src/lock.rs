//! Advisory file lock over the state directory.
//!
//! Every CLI command runs in its own process, so the orchestrator's
//! in-process guard cannot see a cron sync racing an administrator's
//! `disable`. Commands that touch state hold this lock for their whole run.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the lock file inside the state directory.
pub const LOCK_FILE: &str = "xmlrpc-allowlist.lock";

/// Holds an exclusive lock on the state directory until dropped.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Wait for the lock.
    pub fn acquire(state_dir: impl AsRef<Path>) -> Result<Self> {
        let (file, path) = Self::open(state_dir.as_ref())?;
        file.lock_exclusive()?;
        log::debug!("Acquired state lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Take the lock only if nobody holds it. A held lock yields
    /// [`Error::SyncInProgress`].
    pub fn try_acquire(state_dir: impl AsRef<Path>) -> Result<Self> {
        let (file, path) = Self::open(state_dir.as_ref())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                log::debug!("State lock {} is held elsewhere", path.display());
                Err(Error::SyncInProgress)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(state_dir: &Path) -> io::Result<(File, PathBuf)> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        // Never truncate: another process may already hold the lock.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, path))
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
