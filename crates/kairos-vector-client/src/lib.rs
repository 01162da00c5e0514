//! Vector store adapter: point upsert/retrieve/search/scroll/delete with
//! space-scoped filters and named vectors.

mod memory;
mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::{QdrantConfig, QdrantStore};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Error types for vector store operations
#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// HTTP transport or status errors
    #[error("vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Response did not have the expected shape
    #[error("unexpected vector store response: {0}")]
    BadResponse(String),
    /// The store did not become healthy within the startup budget
    #[error("vector store not healthy after {0} attempts")]
    NotHealthy(u32),
}

/// One stored point: id, embedding vector, and JSON payload.
///
/// Reads that do not need the vector leave it empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A search hit with its raw similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub point: PointRecord,
    pub score: f32,
}

/// Payload filter applied to reads.
///
/// Empty `spaces` means no space constraint; scoped callers always pass at
/// least one space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// `space_id` must match one of these.
    pub spaces: Vec<String>,
    /// `chain.id` must match.
    pub chain_id: Option<Uuid>,
    /// `chain.step_index` must match.
    pub step_index: Option<u32>,
    /// `type` must not match any of these.
    pub exclude_kinds: Vec<String>,
}

impl Filter {
    pub fn in_spaces(spaces: &[String]) -> Self {
        Self {
            spaces: spaces.to_vec(),
            ..Self::default()
        }
    }

    pub fn chain(spaces: &[String], chain_id: Uuid) -> Self {
        Self {
            spaces: spaces.to_vec(),
            chain_id: Some(chain_id),
            ..Self::default()
        }
    }

    pub fn chain_step(spaces: &[String], chain_id: Uuid, step_index: u32) -> Self {
        Self {
            spaces: spaces.to_vec(),
            chain_id: Some(chain_id),
            step_index: Some(step_index),
            ..Self::default()
        }
    }
}

/// Narrow interface over the vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace points by id. Idempotent.
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), VectorStoreError>;

    /// Fetch points by id; missing ids are silently absent from the result.
    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<PointRecord>, VectorStoreError>;

    /// Replace the payload of an existing point, leaving its vector alone.
    async fn set_payload(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), VectorStoreError>;

    /// Nearest-neighbor search, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    /// Enumerate points matching a filter, in stable id order.
    async fn scroll(&self, limit: usize, filter: &Filter)
        -> Result<Vec<PointRecord>, VectorStoreError>;

    /// Remove points by id.
    async fn delete(&self, ids: &[Uuid]) -> Result<(), VectorStoreError>;

    /// Total number of stored points.
    async fn count(&self) -> Result<u64, VectorStoreError>;
}
