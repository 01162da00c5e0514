//! Memory store: chain and step persistence, quality-boosted search, and a
//! process-local payload cache kept coherent across replicas through
//! pub/sub invalidation.

mod invalidation;
mod search;
mod store;

pub use invalidation::run_invalidation_listener;
pub use search::SearchHit;
pub use store::{MemoryStore, UpdateSpec, INVALIDATION_CHANNEL};

use kairos_kv::KvError;
use kairos_types::Step;
use kairos_vector_client::VectorStoreError;
use thiserror::Error;
use uuid::Uuid;

/// Error types for memory store operations
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("vector store error: {0}")]
    Vector(#[from] VectorStoreError),
    #[error("kv store error: {0}")]
    Kv(#[from] KvError),
    #[error("no step found for {0}")]
    NotFound(Uuid),
    #[error("payload for {0} is not a valid step")]
    BadPayload(Uuid),
    /// A chain with the same normalized label already exists. Carries the
    /// existing steps so the caller can show them.
    #[error("chain '{label}' already exists")]
    DuplicateChain {
        id: Uuid,
        label: String,
        existing: Vec<Step>,
    },
}
