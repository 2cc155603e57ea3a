//! # TTL Cache
//!
//! The main cache type coordinating the in-process memo layer and the
//! persistent content store.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, KeyPattern};
use crate::error::CacheError;
use crate::store::ContentStore;

/// Configuration for a [`TtlCache`] instance
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// Time-to-live applied to every entry written through this instance
    pub ttl: Duration,
    /// Whether to keep an in-process memo layer in front of the store
    pub memoize: bool,
    /// Key namespace; every store key is `<prefix>:<userKey>`
    pub prefix: String,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            memoize: true,
            prefix: "depot".to_string(),
        }
    }
}

impl TtlCacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_memoize(mut self, memoize: bool) -> Self {
        self.memoize = memoize;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Expiry-aware cache over a persistent content store.
///
/// Entries are checked for expiry on every read and lazily evicted; there is
/// no background sweep. The persistent store is the source of truth; the memo
/// layer is a read-through accelerator owned by this instance alone.
pub struct TtlCache {
    store: Arc<dyn ContentStore>,
    config: TtlCacheConfig,
    memo: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    /// Create a cache over the given store.
    ///
    /// # Panics
    ///
    /// Panics if the configured prefix contains a wildcard character.
    pub fn new(store: Arc<dyn ContentStore>, config: TtlCacheConfig) -> Self {
        if config.prefix.contains('*') {
            panic!(
                "cache prefix must not contain wildcard characters: {}",
                config.prefix
            );
        }

        Self {
            store,
            config,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration reference
    pub fn config(&self) -> &TtlCacheConfig {
        &self.config
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }

    fn user_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key
            .strip_prefix(self.config.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    fn reject_wildcard(key: &str) -> Result<(), CacheError> {
        if key.contains('*') {
            return Err(CacheError::WildcardKey(key.to_string()));
        }
        Ok(())
    }

    /// Get the live entry for `key`, or `None` if absent or expired.
    ///
    /// Expired entries found along the way are removed from both layers, so
    /// a read heals the cache without a background sweep.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        Self::reject_wildcard(key)?;
        let full_key = self.full_key(key);

        if self.config.memoize {
            let memo_hit = self.memo.read().get(&full_key).cloned();
            if let Some(entry) = memo_hit {
                if entry.is_expired() {
                    self.memo.write().remove(&full_key);
                } else {
                    return Ok(Some(serde_json::from_value(entry.data)?));
                }
            }
        }

        let Some(bytes) = self.store.get(&full_key).await? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding unreadable cache entry");
                self.store.remove(&full_key).await?;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            debug!(key = %full_key, "Evicting expired cache entry on read");
            self.store.remove(&full_key).await?;
            return Ok(None);
        }

        if self.config.memoize {
            self.memo.write().insert(full_key, entry.clone());
        }

        Ok(Some(serde_json::from_value(entry.data)?))
    }

    /// Write `data` under `key` with a fresh expiry of now + ttl
    pub async fn set<T: Serialize>(&self, key: &str, data: &T) -> Result<(), CacheError> {
        Self::reject_wildcard(key)?;
        let full_key = self.full_key(key);

        let entry = CacheEntry::new(serde_json::to_value(data)?, self.config.ttl);
        let bytes = serde_json::to_vec(&entry)?;
        self.store.put(&full_key, bytes.into()).await?;

        if self.config.memoize {
            self.memo.write().insert(full_key, entry);
        }

        Ok(())
    }

    /// Return the live entry for `key`, or invoke `fetcher`, store its
    /// result, and return it.
    ///
    /// Concurrent calls with the same key may each invoke the fetcher; this
    /// cache provides no dogpile protection within or across processes.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetcher: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Box<dyn StdError + Send + Sync>>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }

        let fetched = fetcher().await.map_err(CacheError::Fetch)?;
        self.set(key, &fetched).await?;
        Ok(fetched)
    }

    /// Get every live entry whose key matches `pattern`.
    ///
    /// `*` in the pattern matches any character sequence; a pattern without
    /// a wildcard matches by prefix. The returned map is keyed by the user
    /// key (this cache's prefix stripped). Store errors on individual
    /// entries are skipped so one bad entry cannot abort the scan.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        pattern: &str,
    ) -> Result<HashMap<String, T>, CacheError> {
        let matcher = KeyPattern::compile(&self.full_key(pattern));
        let mut results: HashMap<String, T> = HashMap::new();

        if self.config.memoize {
            let mut expired = Vec::new();
            {
                let memo = self.memo.read();
                for (full_key, entry) in memo.iter() {
                    if !matcher.matches(full_key) {
                        continue;
                    }
                    if entry.is_expired() {
                        expired.push(full_key.clone());
                        continue;
                    }
                    let Some(user_key) = self.user_key(full_key) else {
                        continue;
                    };
                    match serde_json::from_value(entry.data.clone()) {
                        Ok(value) => {
                            results.insert(user_key.to_string(), value);
                        }
                        Err(e) => {
                            warn!(key = %full_key, error = %e, "Skipping undecodable memo entry");
                        }
                    }
                }
            }
            if !expired.is_empty() {
                let mut memo = self.memo.write();
                for full_key in &expired {
                    memo.remove(full_key);
                }
            }
        }

        for full_key in self.store.list().await? {
            if !matcher.matches(&full_key) {
                continue;
            }
            let Some(user_key) = self.user_key(&full_key) else {
                continue;
            };
            // Keys already satisfied from memo are never double-reported
            if results.contains_key(user_key) {
                continue;
            }

            let bytes = match self.store.get(&full_key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Skipping unreadable store entry in scan");
                    continue;
                }
            };

            let entry: CacheEntry = match serde_json::from_slice(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Removing corrupt store entry found in scan");
                    let _ = self.store.remove(&full_key).await;
                    continue;
                }
            };

            if entry.is_expired() {
                let _ = self.store.remove(&full_key).await;
                if self.config.memoize {
                    self.memo.write().remove(&full_key);
                }
                continue;
            }

            match serde_json::from_value(entry.data) {
                Ok(value) => {
                    results.insert(user_key.to_string(), value);
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Skipping undecodable store entry in scan");
                }
            }
        }

        Ok(results)
    }

    /// Remove `key` from both layers
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        Self::reject_wildcard(key)?;
        let full_key = self.full_key(key);

        if self.config.memoize {
            self.memo.write().remove(&full_key);
        }
        self.store.remove(&full_key).await?;
        Ok(())
    }

    /// Remove every entry whose key matches `pattern`, returning the number
    /// of store entries removed. Omitting the pattern removes everything
    /// under this cache's prefix.
    pub async fn delete_all(&self, pattern: Option<&str>) -> Result<usize, CacheError> {
        let matcher = match pattern {
            Some(pattern) => KeyPattern::compile(&self.full_key(pattern)),
            None => KeyPattern::compile(&format!("{}:", self.config.prefix)),
        };

        let mut removed = 0;
        for full_key in self.store.list().await? {
            if !matcher.matches(&full_key) {
                continue;
            }
            self.store.remove(&full_key).await?;
            removed += 1;
            if self.config.memoize {
                self.memo.write().remove(&full_key);
            }
        }

        debug!(count = removed, "Deleted cache entries");
        Ok(removed)
    }

    /// Full reset: every entry under this cache's prefix plus the memo layer
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.delete_all(None).await?;
        self.clear_memo();
        Ok(())
    }

    /// Reset the memo layer only, leaving disk state untouched.
    ///
    /// Forces the next read of every key to consult the persistent store.
    pub fn clear_memo(&self) {
        self.memo.write().clear();
    }
}
