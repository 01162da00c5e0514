//! Step and chain persistence over the vector store and embedding adapters.

use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use kairos_chain_builder::ChainDoc;
use kairos_embedding_client::Embedder;
use kairos_kv::KeyValueStore;
use kairos_types::markers::extract_body;
use kairos_types::{chain_id, ChainRef, Step};
use kairos_vector_client::{Filter, PointRecord, VectorStore};

use crate::MemoryError;

/// Pub/sub channel carrying evicted step uuids between replicas.
pub const INVALIDATION_CHANNEL: &str = "invalidate";

/// Step payload cache capacity per store instance.
const CACHE_CAPACITY: usize = 256;

/// Upper bound on points examined when resolving a whole chain.
const CHAIN_SCROLL_LIMIT: usize = 500;

/// An `update` request: either a replacement body or verbatim field
/// replacements.
pub enum UpdateSpec {
    /// Replace the step text. `KAIROS:BODY-START/END` markers, when present,
    /// select the region that becomes the new body.
    Text(String),
    /// Replace payload fields verbatim. Identity fields (`uuid`, `chain`,
    /// `space_id`) are never writable this way.
    Fields(serde_json::Map<String, serde_json::Value>),
}

/// Store and retrieve chains and steps.
pub struct MemoryStore {
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    kv: Arc<dyn KeyValueStore>,
    cache: Mutex<LruCache<Uuid, Step>>,
}

impl MemoryStore {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            vector,
            embedder,
            kv,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    pub(crate) fn vector(&self) -> &dyn VectorStore {
        self.vector.as_ref()
    }

    pub(crate) fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Convert a retrieved point into a step.
    pub(crate) fn step_from_point(point: &PointRecord) -> Result<Step, MemoryError> {
        let mut step: Step = serde_json::from_value(point.payload.clone())
            .map_err(|_| MemoryError::BadPayload(point.id))?;
        step.uuid = point.id;
        Ok(step)
    }

    /// Fetch a step by uuid, honoring the caller's allowed spaces.
    pub async fn get(&self, uuid: Uuid, spaces: &[String]) -> Result<Option<Step>, MemoryError> {
        if let Some(step) = self.cache.lock().expect("poisoned").get(&uuid).cloned() {
            return Ok(space_checked(step, spaces));
        }

        let points = self.vector.retrieve(&[uuid]).await?;
        let Some(point) = points.first() else {
            return Ok(None);
        };
        let step = Self::step_from_point(point)?;
        self.cache
            .lock()
            .expect("poisoned")
            .put(uuid, step.clone());
        Ok(space_checked(step, spaces))
    }

    /// Store one parsed chain. Fails with [`MemoryError::DuplicateChain`]
    /// when the derived chain id already exists in the space, unless
    /// `force_update` deletes the previous chain first.
    pub async fn store_chain(
        &self,
        doc: &ChainDoc,
        author: &str,
        space: &str,
        force_update: bool,
    ) -> Result<Vec<Step>, MemoryError> {
        let chain = chain_id(&doc.label);
        let spaces = vec![space.to_string()];

        let existing = self
            .vector
            .scroll(CHAIN_SCROLL_LIMIT, &Filter::chain(&spaces, chain))
            .await?;
        if !existing.is_empty() {
            if !force_update {
                let existing = existing
                    .iter()
                    .filter_map(|p| Self::step_from_point(p).ok())
                    .collect();
                return Err(MemoryError::DuplicateChain {
                    id: chain,
                    label: doc.label.clone(),
                    existing,
                });
            }
            let old_ids: Vec<Uuid> = existing.iter().map(|p| p.id).collect();
            debug!("Replacing chain {} ({} steps)", chain, old_ids.len());
            self.vector.delete(&old_ids).await?;
            for id in &old_ids {
                self.invalidate(*id).await;
            }
        }

        let step_count = doc.steps.len() as u32;
        let now = Utc::now();
        let steps: Vec<Step> = doc
            .steps
            .iter()
            .enumerate()
            .map(|(index, draft)| Step {
                uuid: Uuid::new_v4(),
                label: draft.label.clone(),
                tags: draft.tags.clone(),
                text: draft.body.clone(),
                llm_model_id: author.to_string(),
                created_at: now,
                space_id: space.to_string(),
                task: None,
                kind: None,
                quality_metadata: Default::default(),
                quality_metrics: Default::default(),
                chain: Some(ChainRef {
                    id: chain,
                    label: doc.label.clone(),
                    step_index: index as u32 + 1,
                    step_count,
                }),
                proof_of_work: draft.proof.clone(),
                extensions: Default::default(),
            })
            .collect();

        let bodies: Vec<String> = steps.iter().map(|s| s.text.clone()).collect();
        let vectors = match self.embedder.embed_batch(&bodies).await {
            Ok(vectors) => vectors,
            Err(err) => {
                // Zero vectors keep the mint idempotent when embeddings
                // are down; the points remain reachable by id and scroll
                warn!("Embedding failed while storing chain {chain}: {err}");
                vec![vec![0.0; self.embedder.dimension()]; steps.len()]
            }
        };

        let points = steps
            .iter()
            .zip(vectors)
            .map(|(step, vector)| PointRecord {
                id: step.uuid,
                vector,
                payload: serde_json::to_value(step).expect("step serializes"),
            })
            .collect();
        self.vector.upsert(points).await?;

        Ok(steps)
    }

    /// Persist a single step under its own uuid, embedding its body. Used
    /// for seeding fixed-identity system steps.
    pub async fn put_step(&self, step: &Step) -> Result<(), MemoryError> {
        let vector = match self.embedder.embed(&step.text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("Embedding failed while storing step {}: {err}", step.uuid);
                vec![0.0; self.embedder.dimension()]
            }
        };
        self.vector
            .upsert(vec![PointRecord {
                id: step.uuid,
                vector,
                payload: serde_json::to_value(step).expect("step serializes"),
            }])
            .await?;
        self.invalidate(step.uuid).await;
        Ok(())
    }

    /// Persist a step whose payload changed without touching its vector.
    pub async fn put_payload(&self, step: &Step) -> Result<(), MemoryError> {
        self.vector
            .set_payload(step.uuid, serde_json::to_value(step).expect("step serializes"))
            .await?;
        self.invalidate(step.uuid).await;
        Ok(())
    }

    /// Apply an update to a step.
    pub async fn update(
        &self,
        uuid: Uuid,
        spec: UpdateSpec,
        spaces: &[String],
    ) -> Result<Step, MemoryError> {
        let step = self
            .get(uuid, spaces)
            .await?
            .ok_or(MemoryError::NotFound(uuid))?;

        let updated = match spec {
            UpdateSpec::Text(text) => {
                let mut updated = step;
                updated.text = extract_body(&text).to_string();
                let vector = match self.embedder.embed(&updated.text).await {
                    Ok(vector) => vector,
                    Err(err) => {
                        warn!("Embedding failed while updating {uuid}: {err}");
                        vec![0.0; self.embedder.dimension()]
                    }
                };
                self.vector
                    .upsert(vec![PointRecord {
                        id: uuid,
                        vector,
                        payload: serde_json::to_value(&updated).expect("step serializes"),
                    }])
                    .await?;
                updated
            }
            UpdateSpec::Fields(mut fields) => {
                for protected in ["uuid", "chain", "space_id"] {
                    fields.remove(protected);
                }
                let mut payload =
                    serde_json::to_value(&step).expect("step serializes");
                if let Some(object) = payload.as_object_mut() {
                    for (key, value) in fields {
                        object.insert(key, value);
                    }
                }
                let mut updated: Step = serde_json::from_value(payload)
                    .map_err(|_| MemoryError::BadPayload(uuid))?;
                updated.uuid = uuid;
                self.vector
                    .set_payload(uuid, serde_json::to_value(&updated).expect("step serializes"))
                    .await?;
                updated
            }
        };

        self.invalidate(uuid).await;
        Ok(updated)
    }

    /// Remove a step.
    pub async fn delete(&self, uuid: Uuid) -> Result<(), MemoryError> {
        self.vector.delete(&[uuid]).await?;
        self.invalidate(uuid).await;
        Ok(())
    }

    /// First step of the chain a step belongs to.
    pub async fn get_chain_first(
        &self,
        step: &Step,
        spaces: &[String],
    ) -> Result<Option<Step>, MemoryError> {
        self.chain_neighbor(step, spaces, |_| Some(1)).await
    }

    /// Successor within the chain, if any.
    pub async fn get_chain_next(
        &self,
        step: &Step,
        spaces: &[String],
    ) -> Result<Option<Step>, MemoryError> {
        self.chain_neighbor(step, spaces, |chain| {
            (chain.step_index < chain.step_count).then_some(chain.step_index + 1)
        })
        .await
    }

    /// Predecessor within the chain, if any.
    pub async fn get_chain_previous(
        &self,
        step: &Step,
        spaces: &[String],
    ) -> Result<Option<Step>, MemoryError> {
        self.chain_neighbor(step, spaces, |chain| {
            (chain.step_index > 1).then_some(chain.step_index - 1)
        })
        .await
    }

    async fn chain_neighbor(
        &self,
        step: &Step,
        spaces: &[String],
        target: impl FnOnce(&ChainRef) -> Option<u32>,
    ) -> Result<Option<Step>, MemoryError> {
        let Some(chain) = &step.chain else {
            return Ok(None);
        };
        let Some(target_index) = target(chain) else {
            return Ok(None);
        };
        if target_index == chain.step_index {
            return Ok(Some(step.clone()));
        }
        let points = self
            .vector
            .scroll(1, &Filter::chain_step(spaces, chain.id, target_index))
            .await?;
        match points.first() {
            Some(point) => Ok(Some(Self::step_from_point(point)?)),
            None => Ok(None),
        }
    }

    /// Evict a step locally and tell the other replicas to do the same.
    pub async fn invalidate(&self, uuid: Uuid) {
        self.evict(uuid);
        if let Err(err) = self
            .kv
            .publish(INVALIDATION_CHANNEL, &uuid.to_string())
            .await
        {
            warn!("Failed to publish invalidation for {uuid}: {err}");
        }
    }

    /// Evict a step from the local cache only.
    pub fn evict(&self, uuid: Uuid) {
        self.cache.lock().expect("poisoned").pop(&uuid);
    }

    pub(crate) fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }
}

fn space_checked(step: Step, spaces: &[String]) -> Option<Step> {
    if spaces.is_empty() || spaces.iter().any(|s| *s == step.space_id) {
        Some(step)
    } else {
        None
    }
}
