use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted cache entry: the payload plus its absolute expiry time.
///
/// The on-disk encoding is UTF-8 JSON with camelCase field names so entries
/// written by other tooling against the same store remain readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The cached payload, as arbitrary JSON
    pub data: Value,
    /// When the entry expires, in epoch milliseconds
    pub expires_at: u64,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(data: Value, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: now_millis().saturating_add(ttl.as_millis() as u64),
        }
    }

    /// Check if the entry has expired.
    ///
    /// An expired entry is logically absent even while still physically
    /// present in the store.
    pub fn is_expired(&self) -> bool {
        now_millis() > self.expires_at
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
