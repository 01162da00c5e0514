//! Key/value adapter: get/set/delete/incr with TTL, JSON helpers, and
//! pub/sub used for cross-replica cache invalidation.

mod memory;
mod redis_store;

pub use memory::MemoryKvStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types for KV operations
#[derive(Error, Debug)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Narrow interface over the key/value collaborator.
///
/// Implementations apply their own key prefix; callers pass logical keys
/// like `nonce:<uuid>`. Every operation is a single read or single write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a value, with an optional TTL refreshed on every write.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Delete-and-return, used to consume single-use tokens.
    async fn take(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Increment a counter, returning the new value.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, KvError>;

    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, message: &str) -> Result<(), KvError>;

    /// Subscribe to a channel; the receiver yields raw message payloads and
    /// closes when the underlying connection does.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, KvError>;
}

/// Read a key and deserialize its JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize a value to JSON and store it.
pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), KvError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}
