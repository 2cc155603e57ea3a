//! # Depot
//!
//! A library for coordinating expensive downloads and caching their
//! results across independent processes.
//!
//! ## Features
//!
//! - TTL-based persistent cache over a pluggable content store
//! - Optional in-process memoization for fast repeated reads
//! - Wildcard pattern reads and bulk deletes
//! - Cross-process download locks with stale and orphan recovery
//! - HTTP fetching with retry and progress reporting

pub mod cache;
pub mod download;
pub mod error;
pub mod lock;
pub mod store;

pub use cache::{CacheEntry, TtlCache, TtlCacheConfig};
pub use error::{CacheError, DownloadError};

// Re-export the store contract and its file-backed implementation
pub use store::{ContentStore, FileStore};

// Re-export lock management types
pub use lock::{
    Clock, LockGuard, LockManager, LockOptions, LockRecord, ProcessProbe, SystemClock,
    SystemProcessProbe, lock_path_for,
};

// Re-export download utilities
pub use download::{
    DownloadCoordinator, Downloaded, FetchOptions, Fetcher, HttpFetcher, ProgressFn, create_client,
};
