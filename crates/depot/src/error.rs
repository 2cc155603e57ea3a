use reqwest::StatusCode;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Wildcard characters are reserved for pattern operations and rejected
    /// on single-entry keys.
    #[error("wildcard `*` is not allowed in cache key: {0}")]
    WildcardKey(String),

    #[error("store I/O error: {0}")]
    Store(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("fetcher error: {0}")]
    Fetch(#[source] Box<dyn StdError + Send + Sync>),
}

// Custom error type for download operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Server returned status code {0}")]
    Status(StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Waited `lock_timeout` without the lock clearing or the destination
    /// file appearing. Distinct from a failed download so callers can tell
    /// "download failed" apart from "gave up waiting for someone else's".
    #[error("timed out waiting for download lock on {} after {waited:?}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
}
