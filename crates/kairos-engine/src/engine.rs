//! Engine construction and the helpers shared by every operation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use kairos_kv::KeyValueStore;
use kairos_memory::MemoryStore;
use kairos_proof::ProofEngine;
use kairos_types::error::Operation;
use kairos_types::{
    memory_uri, parse_memory_uri, Challenge, CurrentStep, ResponseMetadata, Step, StepResponse,
    GENESIS_HASH,
};

use crate::EngineError;

/// Engine tunables, wired from configuration at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum blended score for a search match.
    pub score_threshold: f32,
    /// Whether search folds candidates to one per chain.
    pub collapse_enabled: bool,
    /// Space used when the request names none.
    pub default_space: String,
    /// TTL of cached search responses.
    pub search_cache_ttl: Duration,
    /// Cap on returned matches.
    pub max_matches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.3,
            collapse_enabled: true,
            default_space: "public".to_string(),
            search_cache_ttl: Duration::from_secs(300),
            max_matches: 10,
        }
    }
}

/// Implements the operation surface over the memory store and proof engine.
pub struct ExecutionEngine {
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) proof: ProofEngine,
    pub(crate) kv: Arc<dyn KeyValueStore>,
    pub(crate) config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        memory: Arc<MemoryStore>,
        proof: ProofEngine,
        kv: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            memory,
            proof,
            kv,
            config,
        }
    }

    /// The memory store this engine operates on.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The caller's allowed spaces: the requested space (or the default),
    /// with `public` always readable.
    pub(crate) fn allowed_spaces(&self, space: Option<&str>) -> Vec<String> {
        let requested = space
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_space.clone());
        let mut spaces = vec![requested];
        if spaces[0] != "public" {
            spaces.push("public".to_string());
        }
        spaces
    }

    /// Resolve a URI to a step within the allowed spaces.
    pub(crate) async fn load_step(
        &self,
        uri: &str,
        spaces: &[String],
        op: Operation,
    ) -> Result<Step, EngineError> {
        let uuid = parse_memory_uri(uri)
            .map_err(|err| EngineError::InvalidInput(err.to_string()))?;
        self.load_step_by_uuid(uuid, spaces, op).await
    }

    pub(crate) async fn load_step_by_uuid(
        &self,
        uuid: Uuid,
        spaces: &[String],
        op: Operation,
    ) -> Result<Step, EngineError> {
        self.memory
            .get(uuid, spaces)
            .await
            .map_err(|err| EngineError::backend(op, err))?
            .ok_or_else(|| EngineError::NotFound(memory_uri(&uuid)))
    }

    /// The hash a solution for this step must carry: the stored hash of its
    /// predecessor, or the genesis constant at a chain head.
    pub(crate) async fn expected_prev_hash(
        &self,
        step: &Step,
        spaces: &[String],
        op: Operation,
    ) -> Result<String, EngineError> {
        let previous = self
            .memory
            .get_chain_previous(step, spaces)
            .await
            .map_err(|err| EngineError::backend(op, err))?;
        let Some(previous) = previous else {
            return Ok(GENESIS_HASH.to_string());
        };
        let stored = self
            .proof
            .store()
            .get_proof_hash(&previous.uuid)
            .await
            .map_err(|err| EngineError::backend(op, err))?;
        Ok(stored.unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    /// Shape the `begin`/`next` success response around a current step.
    pub(crate) fn step_response(
        &self,
        step: &Step,
        challenge: Option<Challenge>,
        next: Option<&Step>,
        message: Option<String>,
        proof_hash: Option<String>,
        started: Instant,
    ) -> StepResponse {
        let uri = memory_uri(&step.uuid);
        let next_action = match next {
            Some(next) => {
                let position = next
                    .chain
                    .as_ref()
                    .map(|chain| format!("step {}/{}", chain.step_index, chain.step_count))
                    .unwrap_or_else(|| "the next step".to_string());
                format!(
                    "call kairos_next with {uri} and a solution matching the challenge; \
                     on success you advance to {position} '{}' ({})",
                    next.label,
                    memory_uri(&next.uuid)
                )
            }
            None => format!(
                "call kairos_next with {uri} and a solution matching the challenge -- \
                 this is the final step. After it succeeds: Run complete; call kairos_attest \
                 with {uri} and outcome \"success\" or \"failure\"."
            ),
        };

        StepResponse {
            must_obey: true,
            message,
            current_step: CurrentStep::markdown(uri, step.text.clone()),
            challenge,
            next_action,
            proof_hash,
            metadata: Some(metadata(started)),
        }
    }
}

/// Timing metadata attached to every engine response.
pub(crate) fn metadata(started: Instant) -> ResponseMetadata {
    ResponseMetadata {
        duration_ms: started.elapsed().as_millis() as u64,
        cached: None,
    }
}
