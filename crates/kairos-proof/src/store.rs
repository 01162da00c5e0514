//! Per-step proof state over the key/value adapter: nonce, latest proof
//! record, proof hash, and retry counter. Every key carries a TTL refreshed
//! on write.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use kairos_kv::{get_json, set_json, KeyValueStore, KvError};
use kairos_types::ProofRecord;

/// How long per-step proof state survives between submissions.
pub const PROOF_TTL: Duration = Duration::from_secs(3600);

/// Key/value-backed store of per-step proof state.
pub struct ProofStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ProofStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv, ttl: PROOF_TTL }
    }

    fn nonce_key(step: &Uuid) -> String {
        format!("nonce:{step}")
    }

    fn result_key(step: &Uuid) -> String {
        format!("proof:{step}")
    }

    fn hash_key(step: &Uuid) -> String {
        format!("proof_hash:{step}")
    }

    fn retry_key(step: &Uuid) -> String {
        format!("retry:{step}")
    }

    pub async fn set_nonce(&self, step: &Uuid, nonce: &str) -> Result<(), KvError> {
        self.kv
            .set(&Self::nonce_key(step), nonce, Some(self.ttl))
            .await
    }

    pub async fn get_nonce(&self, step: &Uuid) -> Result<Option<String>, KvError> {
        self.kv.get(&Self::nonce_key(step)).await
    }

    /// Delete-and-return; a consumed nonce can never validate twice.
    pub async fn consume_nonce(&self, step: &Uuid) -> Result<Option<String>, KvError> {
        self.kv.take(&Self::nonce_key(step)).await
    }

    pub async fn save_result(&self, step: &Uuid, record: &ProofRecord) -> Result<(), KvError> {
        set_json(
            self.kv.as_ref(),
            &Self::result_key(step),
            record,
            Some(self.ttl),
        )
        .await
    }

    pub async fn get_result(&self, step: &Uuid) -> Result<Option<ProofRecord>, KvError> {
        get_json(self.kv.as_ref(), &Self::result_key(step)).await
    }

    pub async fn set_proof_hash(&self, step: &Uuid, hash: &str) -> Result<(), KvError> {
        self.kv
            .set(&Self::hash_key(step), hash, Some(self.ttl))
            .await
    }

    pub async fn get_proof_hash(&self, step: &Uuid) -> Result<Option<String>, KvError> {
        self.kv.get(&Self::hash_key(step)).await
    }

    /// Bump the retry counter, returning the new count.
    pub async fn increment_retry(&self, step: &Uuid) -> Result<u32, KvError> {
        let count = self
            .kv
            .incr(&Self::retry_key(step), Some(self.ttl))
            .await?;
        Ok(count.max(0) as u32)
    }

    pub async fn reset_retry(&self, step: &Uuid) -> Result<(), KvError> {
        self.kv
            .set(&Self::retry_key(step), "0", Some(self.ttl))
            .await
    }
}
