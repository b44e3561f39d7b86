//! # Response Cache
//!
//! TTL store for successful GET responses, persisted as
//! `{data, createdAt, expiresAt}` JSON under the `http_cache:` namespace of the
//! host key-value store.
//!
//! Expiry is lazy: an expired entry is deleted by the first read that finds it.
//! Nothing sweeps the namespace in the background.
//!
//! Storage failures are logged and degrade to a miss (on read) or a skipped
//! write. A broken cache must never fail a request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::Clock;
use crate::connections::kv_store::KeyValueStore;

/// Namespace prefix of every cache key in the backing store.
pub const CACHE_NAMESPACE: &str = "http_cache:";

/// A persisted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The cached response body.
    pub data: Value,
    /// Unix ms at which the entry was written.
    pub created_at: u64,
    /// Unix ms after which the entry must not be served.
    pub expires_at: u64,
}

impl CacheEntry {
    /// An entry is live up to and including `expires_at`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }
}

/// Builds the logical cache key for a call: method, url and serialized params.
pub fn cache_key(method: &str, url: &str, params: Option<&Value>) -> String {
    let params = match params {
        Some(p) if !p.is_null() => p.to_string(),
        _ => String::new(),
    };
    format!("{}:{}:{}", method.to_uppercase(), url, params)
}

/// TTL response cache over a [`KeyValueStore`].
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Creates a cache writing into `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn storage_key(key: &str) -> String {
        format!("{}{}", CACHE_NAMESPACE, key)
    }

    /// Returns the cached body for `key`, purging it if it has expired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let storage_key = Self::storage_key(key);
        let raw = match self.store.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Cache read failed for '{}': {}", key, e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Discarding unreadable cache entry '{}': {}", key, e);
                self.purge(&storage_key).await;
                return None;
            }
        };

        if entry.is_expired(self.clock.now_ms()) {
            log::debug!("Cache entry '{}' expired", key);
            self.purge(&storage_key).await;
            return None;
        }

        log::debug!("Cache hit '{}'", key);
        Some(entry.data)
    }

    /// Stores `data` under `key` for `ttl`, replacing any previous entry.
    pub async fn set(&self, key: &str, data: Value, ttl: Duration) {
        let now = self.clock.now_ms();
        let entry = CacheEntry {
            data,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Cache entry '{}' not serializable: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&Self::storage_key(key), &raw).await {
            log::warn!("Cache write failed for '{}': {}", key, e);
        }
    }

    /// Drops a single entry.
    pub async fn invalidate(&self, key: &str) {
        self.purge(&Self::storage_key(key)).await;
    }

    /// Drops every entry in the cache namespace, leaving other keys alone.
    pub async fn clear(&self) {
        match self.store.keys_with_prefix(CACHE_NAMESPACE).await {
            Ok(keys) => {
                for key in &keys {
                    self.purge(key).await;
                }
            }
            Err(e) => log::warn!("Cache clear failed: {}", e),
        }
    }

    async fn purge(&self, storage_key: &str) {
        if let Err(e) = self.store.remove(storage_key).await {
            log::warn!("Cache purge failed for '{}': {}", storage_key, e);
        }
    }
}
