//! # Download Coordinator
//!
//! Serializes downloads of the same destination path across independent
//! processes. The winner of the lock race performs the download; losers
//! poll until the finished file appears, the lock frees up, or the wait
//! times out.

use std::path::Path;
use std::time::Instant;

use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::download::fetcher::{Downloaded, FetchOptions, Fetcher};
use crate::error::DownloadError;
use crate::lock::{LockManager, LockOptions};

/// Cross-process download coordinator over a [`Fetcher`] collaborator
pub struct DownloadCoordinator<F> {
    fetcher: F,
    locks: LockManager,
    options: LockOptions,
}

impl<F> DownloadCoordinator<F>
where
    F: Fetcher,
{
    /// Create a coordinator with default lock options
    pub fn new(fetcher: F) -> Self {
        Self::with_options(fetcher, LockOptions::default())
    }

    /// Create a coordinator with custom lock options
    pub fn with_options(fetcher: F, options: LockOptions) -> Self {
        Self::with_parts(fetcher, options, LockManager::new())
    }

    /// Create a coordinator with a custom lock manager, for injected time
    /// and liveness sources
    pub fn with_parts(fetcher: F, options: LockOptions, locks: LockManager) -> Self {
        Self {
            fetcher,
            locks,
            options,
        }
    }

    /// Download `url` into `dest`, coordinating with other processes
    /// targeting the same destination.
    ///
    /// If the destination file already exists, it is returned immediately
    /// with no lock taken and no network call. Otherwise the caller either
    /// wins the lock and downloads, or polls until the winner's file
    /// appears, the lock frees up, or `lock_timeout` elapses. The lock is
    /// released on the download's completion, success or failure.
    pub async fn download_with_lock(
        &self,
        url: &str,
        dest: &Path,
        fetch_options: &FetchOptions,
    ) -> Result<Downloaded, DownloadError> {
        let started = Instant::now();
        loop {
            // Caching fast-path, checked first on every attempt: an existing
            // destination takes no lock and makes no network call.
            if let Some(existing) = finished_file(dest).await? {
                debug!(dest = ?dest, size = existing.size, "Destination already downloaded");
                return Ok(existing);
            }

            match self.locks.try_acquire(dest, url).await? {
                Some(guard) => {
                    // The previous holder may have finished between our last
                    // check and this acquisition
                    if let Some(existing) = finished_file(dest).await? {
                        if let Err(e) = guard.release().await {
                            warn!(dest = ?dest, error = %e, "Failed to remove download lock file");
                        }
                        return Ok(existing);
                    }

                    let result = self.fetcher.fetch(url, dest, fetch_options).await;
                    if let Err(e) = guard.release().await {
                        warn!(dest = ?dest, error = %e, "Failed to remove download lock file");
                    }
                    return result;
                }
                None => {
                    // Another process holds the lock; clear it if its holder
                    // crashed, otherwise wait our turn.
                    if self
                        .locks
                        .reclaim_if_abandoned(dest, self.options.stale_timeout)
                        .await?
                    {
                        continue;
                    }

                    if started.elapsed() >= self.options.lock_timeout {
                        return Err(DownloadError::LockTimeout {
                            path: dest.to_path_buf(),
                            waited: started.elapsed(),
                        });
                    }

                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        }
    }
}

async fn finished_file(dest: &Path) -> Result<Option<Downloaded>, DownloadError> {
    match fs::metadata(dest).await {
        Ok(meta) if meta.is_file() => Ok(Some(Downloaded {
            path: dest.to_path_buf(),
            size: meta.len(),
        })),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{Clock, LockRecord, ProcessProbe, SystemClock, lock_path_for};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubFetcher {
        calls: Arc<AtomicUsize>,
        payload: &'static [u8],
    }

    impl StubFetcher {
        fn new(payload: &'static [u8]) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                payload,
            }
        }

    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(
            &self,
            _url: &str,
            dest: &Path,
            _options: &FetchOptions,
        ) -> Result<Downloaded, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(dest, self.payload).await?;
            Ok(Downloaded {
                path: dest.to_path_buf(),
                size: self.payload.len() as u64,
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _dest: &Path,
            _options: &FetchOptions,
        ) -> Result<Downloaded, DownloadError> {
            Err(DownloadError::Url("simulated failure".to_string()))
        }
    }

    struct StubProbe(bool);

    impl ProcessProbe for StubProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            self.0
        }
    }

    fn write_lock(dest: &Path, start_time: u64) {
        let lock_path = lock_path_for(dest);
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let record = LockRecord {
            pid: std::process::id(),
            start_time,
            url: "https://example.com/held".to_string(),
        };
        std::fs::write(&lock_path, serde_json::to_vec(&record).unwrap()).unwrap();
    }

    fn quick_options() -> LockOptions {
        LockOptions::default()
            .with_lock_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_free_destination_downloads_once_and_leaves_no_lock() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let fetcher = StubFetcher::new(b"artifact");
        let calls = Arc::clone(&fetcher.calls);
        let coordinator = DownloadCoordinator::new(fetcher);

        let downloaded = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(downloaded.size, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dest.exists());
        assert!(!lock_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_existing_file_short_circuits_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        std::fs::write(&dest, b"already-here").unwrap();

        let fetcher = StubFetcher::new(b"never-used");
        let calls = Arc::clone(&fetcher.calls);
        let coordinator = DownloadCoordinator::new(fetcher);

        let downloaded = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(downloaded.size, "already-here".len() as u64);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!lock_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_waiter_observes_holders_finished_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        // A concurrent holder owns a fresh lock and finishes shortly
        let clock = SystemClock;
        write_lock(&dest, clock.now_millis());
        let holder_dest = dest.clone();
        let holder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            fs::write(&holder_dest, b"from-the-holder").await.unwrap();
            fs::remove_file(lock_path_for(&holder_dest)).await.unwrap();
        });

        let fetcher = StubFetcher::new(b"from-the-waiter");
        let calls = Arc::clone(&fetcher.calls);
        let coordinator = DownloadCoordinator::with_options(fetcher, quick_options());

        let downloaded = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await
            .unwrap();
        holder.await.unwrap();

        // The waiter never started a second download
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&dest).unwrap(), b"from-the-holder");
        assert_eq!(downloaded.size, "from-the-holder".len() as u64);
    }

    #[tokio::test]
    async fn test_stale_orphaned_lock_is_reclaimed_and_download_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        // Lock written 10 minutes ago by a process that no longer exists
        let clock = SystemClock;
        write_lock(&dest, clock.now_millis().saturating_sub(600_000));

        let fetcher = StubFetcher::new(b"fresh");
        let calls = Arc::clone(&fetcher.calls);
        let locks = LockManager::with_parts(Arc::new(SystemClock), Arc::new(StubProbe(false)));
        let coordinator = DownloadCoordinator::with_parts(fetcher, quick_options(), locks);

        let downloaded = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(downloaded.size, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!lock_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_live_holder_that_never_releases_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        let clock = SystemClock;
        write_lock(&dest, clock.now_millis());

        let fetcher = StubFetcher::new(b"unreachable");
        let options = LockOptions::default()
            .with_lock_timeout(Duration::from_millis(250))
            .with_poll_interval(Duration::from_millis(25));
        let coordinator = DownloadCoordinator::with_options(fetcher, options);

        let result = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await;

        match result {
            Err(DownloadError::LockTimeout { path, waited }) => {
                assert_eq!(path, dest);
                assert!(waited >= Duration::from_millis(250));
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_download_still_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");

        let coordinator = DownloadCoordinator::new(FailingFetcher);
        let result = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await;

        assert!(matches!(result, Err(DownloadError::Url(_))));
        assert!(!lock_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_corrupt_lock_does_not_block_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pkg.tgz");
        let lock_path = lock_path_for(&dest);
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        std::fs::write(&lock_path, b"]]garbage[[").unwrap();

        let fetcher = StubFetcher::new(b"recovered");
        let calls = Arc::clone(&fetcher.calls);
        let coordinator = DownloadCoordinator::with_options(fetcher, quick_options());

        let downloaded = coordinator
            .download_with_lock("https://example.com/pkg.tgz", &dest, &FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(downloaded.size, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
