//! # Content Store
//!
//! This module defines the contract for the persistent key-to-content store
//! backing the TTL cache, along with a file-backed implementation.

mod file;

pub use file::FileStore;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io;

/// A trait for persistent stores that can hold cached content by key
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Get the content stored under the given key, if any
    async fn get(&self, key: &str) -> io::Result<Option<Bytes>>;

    /// Store content under the given key, replacing any previous content
    async fn put(&self, key: &str, data: Bytes) -> io::Result<()>;

    /// Remove the content stored under the given key.
    /// Removing a key that is not present is not an error.
    async fn remove(&self, key: &str) -> io::Result<()>;

    /// Enumerate every key currently present in the store
    async fn list(&self) -> io::Result<Vec<String>>;
}
