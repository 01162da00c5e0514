//! In-memory implementation of the key/value interface, used by tests and
//! single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

use crate::{KeyValueStore, KvError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> Option<&str> {
        match self.expires_at {
            Some(deadline) if Instant::now() >= deadline => None,
            _ => Some(&self.value),
        }
    }
}

/// Process-local store with the same TTL and pub/sub semantics as the Redis
/// adapter.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.entries.lock().expect("poisoned");
        Ok(entries.get(key).and_then(Entry::live).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().expect("poisoned");
        Ok(entries
            .remove(key)
            .and_then(|entry| entry.live().map(str::to_string)))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().expect("poisoned").remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, KvError> {
        let mut entries = self.entries.lock().expect("poisoned");
        let current = entries
            .get(key)
            .and_then(Entry::live)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(next)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), KvError> {
        // A send error only means nobody is subscribed
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, KvError> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{get_json, set_json};

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = MemoryKvStore::new();
        store.set("nonce:a", "deadbeef", None).await.unwrap();
        assert_eq!(store.get("nonce:a").await.unwrap().as_deref(), Some("deadbeef"));
        assert_eq!(store.get("nonce:b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_values() {
        let store = MemoryKvStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_consumes_the_value() {
        let store = MemoryKvStore::new();
        store.set("once", "token", None).await.unwrap();
        assert_eq!(store.take("once").await.unwrap().as_deref(), Some("token"));
        assert_eq!(store.take("once").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_and_resets_via_set() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("retry", None).await.unwrap(), 1);
        assert_eq!(store.incr("retry", None).await.unwrap(), 2);
        store.set("retry", "0", None).await.unwrap();
        assert_eq!(store.incr("retry", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pub_sub_delivers_messages() {
        let store = MemoryKvStore::new();
        let mut rx = store.subscribe("invalidate").await.unwrap();
        store.publish("invalidate", "some-uuid").await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("some-uuid"));
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = MemoryKvStore::new();
        set_json(&store, "blob", &serde_json::json!({ "a": 1 }), None)
            .await
            .unwrap();
        let back: Option<serde_json::Value> = get_json(&store, "blob").await.unwrap();
        assert_eq!(back.unwrap()["a"], 1);
    }
}
