//! Per-repository session lock.
//!
//! A batch holds the session lock from `begin_batch` until its commit
//! or rollback completes, making the engine single-writer per
//! repository. Two layers:
//! - an in-process `tokio` mutex, so two tasks in the same process
//!   serialize (or fail fast via [`SessionLock::try_acquire`])
//! - a lease-based lock file at `.emend/lock`, so a second process
//!   refuses to start a batch while one is in flight elsewhere
//!
//! The lock is owned by the engine instance, not a process-wide
//! singleton: engines for different repositories coexist in one
//! process without contending.

use crate::{SnapshotError, SnapshotResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// How long a lock file stays valid without being released. A crashed
/// process leaves its lock file behind; the lease lets the next caller
/// reclaim it.
const DEFAULT_LEASE_MS: u64 = 10 * 60 * 1000;

/// On-disk lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_ts: u64,
    expires_ts: u64,
}

impl LockInfo {
    fn new() -> Self {
        let now = current_time_ms();
        Self {
            pid: std::process::id(),
            acquired_ts: now,
            expires_ts: now + DEFAULT_LEASE_MS,
        }
    }

    fn is_expired(&self) -> bool {
        current_time_ms() > self.expires_ts
    }
}

/// The session lock for one repository.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    inner: Arc<Mutex<()>>,
}

impl SessionLock {
    /// Create a lock scoped to the repository's state directory.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("lock"),
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the lock, waiting for an in-process holder to finish.
    pub async fn acquire(&self) -> SnapshotResult<SessionGuard> {
        let permit = self.inner.clone().lock_owned().await;
        self.claim(permit)
    }

    /// Acquire the lock or fail fast with [`SnapshotError::Busy`].
    pub fn try_acquire(&self) -> SnapshotResult<SessionGuard> {
        let permit = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| SnapshotError::Busy)?;
        self.claim(permit)
    }

    fn claim(&self, permit: OwnedMutexGuard<()>) -> SnapshotResult<SessionGuard> {
        if let Some(existing) = self.read_lock_file()? {
            if existing.pid != std::process::id() && !existing.is_expired() {
                return Err(SnapshotError::Busy);
            }
            if existing.is_expired() {
                warn!(
                    pid = existing.pid,
                    "reclaiming expired session lock"
                );
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let info = LockInfo::new();
        std::fs::write(&self.path, serde_json::to_string_pretty(&info)?)?;
        debug!(path = %self.path.display(), "session lock acquired");

        Ok(SessionGuard {
            _permit: permit,
            path: self.path.clone(),
        })
    }

    fn read_lock_file(&self) -> SnapshotResult<Option<LockInfo>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(info) => Ok(Some(info)),
                Err(e) => {
                    warn!(error = %e, "unreadable session lock file, treating as stale");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SnapshotError::Io(e)),
        }
    }
}

/// Held for the lifetime of an in-flight batch. Dropping the guard
/// releases the in-process mutex and removes the lock file.
#[derive(Debug)]
pub struct SessionGuard {
    _permit: OwnedMutexGuard<()>,
    path: PathBuf,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove session lock file");
            }
        }
    }
}

/// Get current time in milliseconds since Unix epoch.
fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
