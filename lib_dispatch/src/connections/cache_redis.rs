//! # Redis Key-Value Store
//!
//! Async Redis backend for [`KeyValueStore`], for hosts that want cache
//! entries and the bearer token to survive a restart. One multiplexed
//! `ConnectionManager` is shared by every call and reconnects on its own.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};

use super::kv_store::{KeyValueStore, StoreError};

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// A handler for Redis cache interactions.
#[derive(Clone)]
pub struct RedisStore {
    /// Shared, auto-reconnecting connection.
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(connection_error)?;
        let connection = ConnectionManager::new(client).await.map_err(connection_error)?;
        log::info!("Connected to Redis at {}", url);
        Ok(Self { connection })
    }
}

fn connection_error(e: RedisError) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn operation_error(e: RedisError) -> StoreError {
    StoreError::Operation(e.to_string())
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await.map_err(operation_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(operation_error)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(operation_error)
    }

    /// Walks the keyspace with cursor based `SCAN`, never the blocking `KEYS`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(operation_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
