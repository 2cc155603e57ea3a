//! # Lock File Manager
//!
//! Creates, inspects, and reclaims the lock files guarding download
//! destinations. Acquisition uses the filesystem's exclusive-create
//! primitive, which behaves identically for unrelated processes on Windows
//! and POSIX; richer semantics (staleness, orphan detection) are layered on
//! top as recovery paths for crashed holders.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::lock::record::{LockRecord, lock_path_for};
use crate::lock::{Clock, ProcessProbe, SystemClock, SystemProcessProbe};

/// Timing knobs for lock acquisition and recovery
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// How long a waiter polls before giving up with a timeout error
    pub lock_timeout: Duration,
    /// Age past which a held lock is presumed abandoned
    pub stale_timeout: Duration,
    /// Delay between polls while waiting on another process's lock
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl LockOptions {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Manager for per-destination lock files
#[derive(Clone)]
pub struct LockManager {
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ProcessProbe>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Create a manager using the system clock and process table
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), Arc::new(SystemProcessProbe))
    }

    /// Create a manager with injected time and liveness sources
    pub fn with_parts(clock: Arc<dyn Clock>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { clock, probe }
    }

    /// Attempt one atomic acquisition of the lock for `dest`.
    ///
    /// Returns `Ok(None)` when another process already holds the lock; that
    /// is the losing side of the race, not an error.
    pub async fn try_acquire(&self, dest: &Path, url: &str) -> io::Result<Option<LockGuard>> {
        let lock_path = lock_path_for(dest);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let record = LockRecord {
            pid: std::process::id(),
            start_time: self.clock.now_millis(),
            url: url.to_string(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&json).await?;
                file.flush().await?;
                debug!(lock = ?lock_path, url = %url, "Acquired download lock");
                Ok(Some(LockGuard {
                    path: lock_path,
                    released: false,
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Inspect the lock held on `dest` and remove it if its holder is gone.
    ///
    /// Returns `true` when the caller may retry acquisition: the lock was
    /// already gone, was unparseable (a corrupt lock must never permanently
    /// block downloads), or was stale/orphaned and has been removed.
    /// Returns `false` while a live holder keeps a fresh lock.
    pub async fn reclaim_if_abandoned(
        &self,
        dest: &Path,
        stale_timeout: Duration,
    ) -> io::Result<bool> {
        let lock_path = lock_path_for(dest);

        let bytes = match fs::read(&lock_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        };

        let record: LockRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(lock = ?lock_path, error = %e, "Removing unparseable lock file");
                remove_lock_file(&lock_path).await?;
                return Ok(true);
            }
        };

        let threshold = stale_timeout.as_millis() as u64;
        let record_age = self.clock.now_millis().saturating_sub(record.start_time);
        // The recorded startTime is authoritative; the file's mtime is a
        // secondary check covering records written with a skewed clock.
        let mtime_age = fs::metadata(&lock_path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| std::time::SystemTime::now().duration_since(mtime).ok())
            .map(|age| age.as_millis() as u64);
        let stale = record_age > threshold || mtime_age.is_some_and(|age| age > threshold);
        let orphaned = !self.probe.is_alive(record.pid);

        if stale || orphaned {
            info!(
                lock = ?lock_path,
                pid = record.pid,
                url = %record.url,
                age_ms = record_age,
                stale,
                orphaned,
                "Reclaiming abandoned download lock"
            );
            remove_lock_file(&lock_path).await?;
            return Ok(true);
        }

        Ok(false)
    }
}

/// Remove a lock file, treating "already gone" as success.
///
/// The original owner may complete and remove its own lock concurrently
/// with a reclaim, so a missing file is the expected benign race.
async fn remove_lock_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Held download lock. Dropping the guard removes the lock file, so the
/// lock cannot leak past an early return or panic on the download path.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the lock file backing this guard
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting any removal error
    pub async fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_lock_file(&self.path).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    struct StubProbe(bool);

    impl ProcessProbe for StubProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0
        }
    }

    fn manager(clock_millis: u64, alive: bool) -> LockManager {
        LockManager::with_parts(
            Arc::new(FixedClock(clock_millis)),
            Arc::new(StubProbe(alive)),
        )
    }

    #[tokio::test]
    async fn test_acquire_writes_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let manager = LockManager::new();

        let guard = manager
            .try_acquire(&dest, "https://example.com/pkg.tgz")
            .await
            .unwrap()
            .expect("lock should be free");

        let record: LockRecord =
            serde_json::from_slice(&std::fs::read(guard.path()).unwrap()).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.url, "https://example.com/pkg.tgz");

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_acquire_loses_the_race() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let manager = LockManager::new();

        let guard = manager
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        let second = manager
            .try_acquire(&dest, "https://example.com/b")
            .await
            .unwrap();
        assert!(second.is_none());

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_frees_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let manager = LockManager::new();

        let guard = manager
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        let lock_path = guard.path().to_path_buf();
        guard.release().await.unwrap();

        assert!(!lock_path.exists());
        let again = manager
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_dropped_guard_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let manager = LockManager::new();

        let lock_path = {
            let guard = manager
                .try_acquire(&dest, "https://example.com/a")
                .await
                .unwrap()
                .unwrap();
            guard.path().to_path_buf()
        };

        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_reclaim_missing_lock_allows_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let manager = LockManager::new();

        assert!(
            manager
                .reclaim_if_abandoned(&dest, Duration::from_secs(300))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reclaim_removes_corrupt_lock() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let lock_path = lock_path_for(&dest);
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        std::fs::write(&lock_path, b"{not json").unwrap();

        let manager = manager(1_000_000, true);
        assert!(
            manager
                .reclaim_if_abandoned(&dest, Duration::from_secs(300))
                .await
                .unwrap()
        );
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_reclaim_removes_stale_lock_with_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        let holder = manager(1_000_000, true);
        let guard = holder
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        let lock_path = guard.path().to_path_buf();
        std::mem::forget(guard);

        // Ten minutes later by the waiter's clock, with a 5 minute threshold
        let waiter = manager(1_000_000 + 600_000, true);
        assert!(
            waiter
                .reclaim_if_abandoned(&dest, Duration::from_secs(300))
                .await
                .unwrap()
        );
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_reclaim_removes_orphaned_lock_regardless_of_age() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        let holder = manager(1_000_000, true);
        let guard = holder
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        std::mem::forget(guard);

        // Same clock reading, but the recorded pid is no longer running
        let waiter = manager(1_000_000, false);
        assert!(
            waiter
                .reclaim_if_abandoned(&dest, Duration::from_secs(300))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reclaim_keeps_fresh_lock_with_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        let holder = manager(1_000_000, true);
        let guard = holder
            .try_acquire(&dest, "https://example.com/a")
            .await
            .unwrap()
            .unwrap();

        let waiter = manager(1_000_000 + 1_000, true);
        assert!(
            !waiter
                .reclaim_if_abandoned(&dest, Duration::from_secs(300))
                .await
                .unwrap()
        );

        guard.release().await.unwrap();
    }
}
