//! # Fetcher Contract
//!
//! The HTTP download collaborator consumed by the download coordinator.
//! Implementations own their retry, redirect, and progress behavior; the
//! coordinator only requires that a successful fetch leaves a fully written
//! destination file (write to a temporary path, then rename into place).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::error::DownloadError;

/// A completed download
#[derive(Debug, Clone)]
pub struct Downloaded {
    /// Final destination path
    pub path: PathBuf,
    /// Size of the downloaded file in bytes
    pub size: u64,
}

/// Callback invoked with the cumulative number of bytes received
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Options forwarded to the fetcher for a single download
#[derive(Clone)]
pub struct FetchOptions {
    /// Extra request headers
    pub headers: HeaderMap,
    /// Retry attempts after the first failure
    pub retries: u32,
    /// Base delay between retries, doubled on each attempt
    pub retry_delay: Duration,
    /// Overall request timeout; zero disables the limit
    pub timeout: Duration,
    /// Progress callback
    pub on_progress: Option<ProgressFn>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self {
            headers: HeaderMap::new(),
            retries: 3,
            retry_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            on_progress: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("headers", &self.headers)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A trait for download collaborators that can fetch a URL to a destination
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into `dest`, returning the final path and size
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<Downloaded, DownloadError>;
}
