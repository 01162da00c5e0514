//! Challenge construction and submission validation.
//!
//! Validation runs a fixed sequence of checks; the first failure wins,
//! bumps the step's retry counter, and comes back as a blocked payload with
//! a fresh challenge while retries remain.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use kairos_embedding_client::{cosine_similarity, Embedder};
use kairos_types::{
    memory_uri, BlockedPayload, Challenge, ErrorCode, ProofDefinition, ProofParams, ProofRecord,
    ProofStatus, Solution, Step,
};

use crate::hash::{canonical_proof_hash, new_nonce};
use crate::store::ProofStore;
use crate::ProofError;

/// Step bodies shorter than this skip the semantic relevance check.
const MIN_BODY_FOR_SEMANTIC_CHECK: usize = 20;

/// Step bodies are truncated to this many characters before embedding.
const MAX_BODY_EMBED_CHARS: usize = 8_000;

/// Tunables for the validation pipeline.
#[derive(Debug, Clone)]
pub struct ProofConfig {
    /// Consecutive failures tolerated before escalation.
    pub max_retries: u32,
    /// Minimum cosine similarity between a comment and its step body.
    pub comment_semantic_threshold: f32,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            comment_semantic_threshold: 0.25,
        }
    }
}

/// Outcome of validating a submission.
pub enum Verdict {
    /// The proof was accepted and the hash chain advanced.
    Accepted {
        proof_hash: String,
        record: ProofRecord,
    },
    /// The proof was rejected; the payload is returned to the agent
    /// verbatim.
    Blocked(Box<BlockedPayload>),
}

/// Builds challenges and validates solutions for one deployment.
pub struct ProofEngine {
    store: ProofStore,
    embedder: Arc<dyn Embedder>,
    config: ProofConfig,
}

impl ProofEngine {
    pub fn new(store: ProofStore, embedder: Arc<dyn Embedder>, config: ProofConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn store(&self) -> &ProofStore {
        &self.store
    }

    /// Issue a challenge for a step, writing a fresh single-use nonce.
    pub async fn build_challenge(
        &self,
        step: &Step,
        expected_prev_hash: &str,
    ) -> Result<Challenge, ProofError> {
        let def = step.effective_proof();
        let nonce = new_nonce();
        self.store.set_nonce(&step.uuid, &nonce).await?;
        debug!("Issued {} challenge for step {}", def.kind(), step.uuid);
        Ok(Challenge::from_definition(
            &def,
            nonce,
            expected_prev_hash.to_string(),
        ))
    }

    /// Reject a submission outright (e.g. no solution at all), applying the
    /// same retry bookkeeping as an in-pipeline failure.
    pub async fn reject(
        &self,
        step: &Step,
        expected_prev_hash: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<Verdict, ProofError> {
        self.block(step, expected_prev_hash, code, message).await
    }

    /// Validate a submission against a step and the expected predecessor
    /// hash.
    pub async fn validate(
        &self,
        step: &Step,
        solution: &Solution,
        expected_prev_hash: &str,
    ) -> Result<Verdict, ProofError> {
        let def = step.effective_proof();

        // 1. Nonce: must equal the one last issued for this step
        let stored_nonce = self.store.get_nonce(&step.uuid).await?;
        let nonce_matches = match (&stored_nonce, &solution.nonce) {
            (Some(stored), Some(submitted)) => stored == submitted,
            _ => false,
        };
        if !nonce_matches {
            return self
                .block(
                    step,
                    expected_prev_hash,
                    ErrorCode::NonceMismatch,
                    "Nonce does not match the one issued for this step.",
                )
                .await;
        }

        // 2. Previous hash: must equal the stored hash of the predecessor
        let Some(submitted_hash) = solution.proof_hash.as_deref() else {
            return self
                .block(
                    step,
                    expected_prev_hash,
                    ErrorCode::MissingField,
                    "Solution is missing proof_hash.",
                )
                .await;
        };
        if submitted_hash != expected_prev_hash {
            return self
                .block(
                    step,
                    expected_prev_hash,
                    ErrorCode::ProofHashMismatch,
                    "proof_hash does not match the predecessor's stored hash.",
                )
                .await;
        }

        // 3. Type
        match solution.proof_type {
            None => {
                return self
                    .block(
                        step,
                        expected_prev_hash,
                        ErrorCode::MissingField,
                        "Solution is missing type.",
                    )
                    .await;
            }
            Some(submitted) if submitted != def.kind() => {
                let message =
                    format!("Expected a {} proof, got {}.", def.kind(), submitted);
                return self
                    .block(step, expected_prev_hash, ErrorCode::TypeMismatch, &message)
                    .await;
            }
            Some(_) => {}
        }

        // 4. Type-specific content
        let status = match self.content_status(&def, solution, &step.text).await {
            Ok(status) => status,
            Err((code, message)) => {
                return self.block(step, expected_prev_hash, code, &message).await;
            }
        };

        // 5. A required proof reporting failure never advances the chain
        if def.required && status == ProofStatus::Failed {
            return self
                .block(
                    step,
                    expected_prev_hash,
                    ErrorCode::CommandFailed,
                    "Required proof reported failure; the proof hash was not advanced.",
                )
                .await;
        }

        // A step already proven successfully keeps its original hash so
        // quality is not double-counted
        if let Some(existing) = self.store.get_result(&step.uuid).await? {
            if existing.status == ProofStatus::Success {
                if let Some(hash) = self.store.get_proof_hash(&step.uuid).await? {
                    self.store.reset_retry(&step.uuid).await?;
                    self.store.consume_nonce(&step.uuid).await?;
                    return Ok(Verdict::Accepted {
                        proof_hash: hash,
                        record: existing,
                    });
                }
            }
        }

        let record = build_record(&def, solution, status);
        let proof_hash = canonical_proof_hash(&record)?;
        self.store.save_result(&step.uuid, &record).await?;
        self.store.set_proof_hash(&step.uuid, &proof_hash).await?;
        self.store.reset_retry(&step.uuid).await?;
        self.store.consume_nonce(&step.uuid).await?;
        debug!("Accepted {} proof for step {}", def.kind(), step.uuid);

        Ok(Verdict::Accepted { proof_hash, record })
    }

    async fn content_status(
        &self,
        def: &ProofDefinition,
        solution: &Solution,
        body: &str,
    ) -> Result<ProofStatus, (ErrorCode, String)> {
        match &def.params {
            ProofParams::Shell { .. } => {
                let shell = solution.shell.as_ref().ok_or_else(|| {
                    (
                        ErrorCode::MissingField,
                        "Solution is missing the shell block.".to_string(),
                    )
                })?;
                let exit_code = shell.exit_code.ok_or_else(|| {
                    (
                        ErrorCode::MissingField,
                        "shell.exit_code is required.".to_string(),
                    )
                })?;
                Ok(if exit_code == 0 {
                    ProofStatus::Success
                } else {
                    ProofStatus::Failed
                })
            }
            ProofParams::Mcp { .. } => {
                let mcp = solution.mcp.as_ref().ok_or_else(|| {
                    (
                        ErrorCode::MissingField,
                        "Solution is missing the mcp block.".to_string(),
                    )
                })?;
                let success = mcp.success.ok_or_else(|| {
                    (
                        ErrorCode::MissingField,
                        "mcp.success is required.".to_string(),
                    )
                })?;
                Ok(if success {
                    ProofStatus::Success
                } else {
                    ProofStatus::Failed
                })
            }
            ProofParams::UserInput { .. } => {
                let confirmed = solution
                    .user_input
                    .as_ref()
                    .and_then(|ui| ui.confirmation.as_deref())
                    .is_some_and(|c| !c.trim().is_empty());
                if confirmed {
                    Ok(ProofStatus::Success)
                } else {
                    Err((
                        ErrorCode::MissingField,
                        "user_input.confirmation is required.".to_string(),
                    ))
                }
            }
            ProofParams::Comment { comment } => {
                let text = solution
                    .comment
                    .as_ref()
                    .and_then(|c| c.text.as_deref())
                    .ok_or_else(|| {
                        (
                            ErrorCode::MissingField,
                            "comment.text is required.".to_string(),
                        )
                    })?;
                if text.chars().count() < comment.min_length {
                    return Err((
                        ErrorCode::CommentTooShort,
                        format!(
                            "Comment must be at least {} characters.",
                            comment.min_length
                        ),
                    ));
                }
                self.check_comment_relevance(text, body).await?;
                Ok(ProofStatus::Success)
            }
        }
    }

    /// Semantic relevance check for comment proofs. Fails open when the
    /// embedding backend is down.
    async fn check_comment_relevance(
        &self,
        text: &str,
        body: &str,
    ) -> Result<(), (ErrorCode, String)> {
        if body.chars().count() < MIN_BODY_FOR_SEMANTIC_CHECK {
            return Ok(());
        }
        let truncated: String = body.chars().take(MAX_BODY_EMBED_CHARS).collect();
        match self
            .embedder
            .embed_batch(&[text.to_string(), truncated])
            .await
        {
            Ok(vectors) if vectors.len() == 2 => {
                let similarity = cosine_similarity(&vectors[0], &vectors[1]);
                if similarity < self.config.comment_semantic_threshold {
                    Err((
                        ErrorCode::CommentIrrelevant,
                        format!(
                            "Comment does not relate to the step body (similarity {:.2}, need {:.2}).",
                            similarity, self.config.comment_semantic_threshold
                        ),
                    ))
                } else {
                    Ok(())
                }
            }
            Ok(_) | Err(_) => {
                warn!("Embedding backend unavailable; accepting length-valid comment");
                Ok(())
            }
        }
    }

    /// Reject a submission: bump the retry counter and shape the blocked
    /// payload, escalating once the limit is passed.
    async fn block(
        &self,
        step: &Step,
        expected_prev_hash: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<Verdict, ProofError> {
        let retry_count = self.store.increment_retry(&step.uuid).await?;
        let uri = memory_uri(&step.uuid);

        let payload = if retry_count <= self.config.max_retries {
            let challenge = self.build_challenge(step, expected_prev_hash).await?;
            BlockedPayload {
                must_obey: true,
                error_code: code,
                message: message.to_string(),
                retry_count,
                challenge: Some(challenge),
                next_action: format!(
                    "retry kairos_next with {uri} -- use nonce and proof_hash from THIS response's challenge"
                ),
                metadata: None,
            }
        } else {
            BlockedPayload {
                must_obey: false,
                error_code: ErrorCode::MaxRetriesExceeded,
                message: format!(
                    "Proof failed {retry_count} times (limit {}). Last error: {message}",
                    self.config.max_retries
                ),
                retry_count,
                challenge: None,
                next_action: format!(
                    "Choose your own recovery: (1) fix the step content with kairos_update using {uri}, \
                     (2) record the run as failed with kairos_attest using {uri} and outcome \"failure\", \
                     or (3) stop and ask a human to intervene."
                ),
                metadata: None,
            }
        };
        Ok(Verdict::Blocked(Box::new(payload)))
    }
}

/// Shape the persisted record for an accepted submission, keeping only the
/// evidence block matching the proof type.
fn build_record(def: &ProofDefinition, solution: &Solution, status: ProofStatus) -> ProofRecord {
    let mut record = ProofRecord {
        result_id: Uuid::new_v4(),
        proof_type: def.kind(),
        status,
        executed_at: Utc::now(),
        shell: None,
        mcp: None,
        user_input: None,
        comment: None,
    };
    match def.params {
        ProofParams::Shell { .. } => record.shell = solution.shell.clone(),
        ProofParams::Mcp { .. } => record.mcp = solution.mcp.clone(),
        ProofParams::UserInput { .. } => record.user_input = solution.user_input.clone(),
        ProofParams::Comment { .. } => record.comment = solution.comment.clone(),
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kairos_embedding_client::EmbeddingError;
    use kairos_kv::MemoryKvStore;
    use kairos_types::{
        CommentProof, CommentSolution, ShellSolution, GENESIS_HASH,
    };

    /// Keyword embedder: texts mentioning "build" are similar to each
    /// other and orthogonal to everything else.
    struct StubEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::CountMismatch {
                    expected: 1,
                    got: 0,
                });
            }
            Ok(if text.contains("build") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    fn engine(fail_embeddings: bool) -> ProofEngine {
        ProofEngine::new(
            ProofStore::new(Arc::new(MemoryKvStore::new())),
            Arc::new(StubEmbedder {
                fail: fail_embeddings,
            }),
            ProofConfig::default(),
        )
    }

    fn comment_step() -> Step {
        Step {
            uuid: Uuid::new_v4(),
            label: "Build the project".to_string(),
            tags: vec![],
            text: "Run the project build and confirm it completes.".to_string(),
            llm_model_id: "test".to_string(),
            created_at: Utc::now(),
            space_id: "public".to_string(),
            task: None,
            kind: None,
            quality_metadata: Default::default(),
            quality_metrics: Default::default(),
            chain: None,
            proof_of_work: Some(ProofDefinition {
                params: ProofParams::Comment {
                    comment: CommentProof { min_length: 10 },
                },
                required: true,
            }),
            extensions: Default::default(),
        }
    }

    fn shell_step(required: bool) -> Step {
        let mut step = comment_step();
        let mut def = ProofDefinition::shell("make test", 60);
        def.required = required;
        step.proof_of_work = Some(def);
        step
    }

    fn comment_solution(nonce: &str, hash: &str, text: &str) -> Solution {
        Solution {
            proof_type: Some(kairos_types::ProofType::Comment),
            nonce: Some(nonce.to_string()),
            proof_hash: Some(hash.to_string()),
            comment: Some(CommentSolution {
                text: Some(text.to_string()),
            }),
            ..Default::default()
        }
    }

    fn shell_solution(nonce: &str, hash: &str, exit_code: i32) -> Solution {
        Solution {
            proof_type: Some(kairos_types::ProofType::Shell),
            nonce: Some(nonce.to_string()),
            proof_hash: Some(hash.to_string()),
            shell: Some(ShellSolution {
                exit_code: Some(exit_code),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn expect_blocked(verdict: Verdict) -> BlockedPayload {
        match verdict {
            Verdict::Blocked(payload) => *payload,
            Verdict::Accepted { .. } => panic!("expected a blocked verdict"),
        }
    }

    fn expect_accepted(verdict: Verdict) -> (String, ProofRecord) {
        match verdict {
            Verdict::Accepted { proof_hash, record } => (proof_hash, record),
            Verdict::Blocked(payload) => {
                panic!("expected acceptance, blocked with {}", payload.error_code)
            }
        }
    }

    #[tokio::test]
    async fn accepts_valid_comment_and_consumes_nonce() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "I ran the build and it completed.",
        );
        let verdict = engine.validate(&step, &solution, GENESIS_HASH).await.unwrap();
        let (proof_hash, record) = expect_accepted(verdict);
        assert_eq!(proof_hash.len(), 64);
        assert_eq!(record.status, ProofStatus::Success);

        // Replaying the very same solution hits the consumed nonce
        let replay = engine.validate(&step, &solution, GENESIS_HASH).await.unwrap();
        let blocked = expect_blocked(replay);
        assert_eq!(blocked.error_code, ErrorCode::NonceMismatch);
    }

    #[tokio::test]
    async fn wrong_previous_hash_is_blocked_with_fresh_challenge() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = comment_solution(
            &challenge.nonce,
            &"0".repeat(64),
            "I ran the build and it completed.",
        );
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::ProofHashMismatch);
        assert!(blocked.must_obey);
        assert_eq!(blocked.retry_count, 1);
        let fresh = blocked.challenge.expect("fresh challenge expected");
        assert_ne!(fresh.nonce, challenge.nonce);
    }

    #[tokio::test]
    async fn missing_proof_hash_is_missing_field() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let mut solution = comment_solution(&challenge.nonce, "", "irrelevant");
        solution.proof_hash = None;
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::MissingField);
    }

    #[tokio::test]
    async fn type_mismatch_is_blocked() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = shell_solution(&challenge.nonce, GENESIS_HASH, 0);
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::TypeMismatch);
    }

    #[tokio::test]
    async fn short_comment_is_blocked() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = comment_solution(&challenge.nonce, GENESIS_HASH, "no");
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::CommentTooShort);
    }

    #[tokio::test]
    async fn irrelevant_comment_is_blocked() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "the weather was pleasant today",
        );
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::CommentIrrelevant);
    }

    #[tokio::test]
    async fn embedding_outage_fails_open() {
        let engine = engine(true);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "the weather was pleasant today",
        );
        let verdict = engine.validate(&step, &solution, GENESIS_HASH).await.unwrap();
        expect_accepted(verdict);
    }

    #[tokio::test]
    async fn required_shell_failure_is_command_failed() {
        let engine = engine(false);
        let step = shell_step(true);
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = shell_solution(&challenge.nonce, GENESIS_HASH, 2);
        let blocked = expect_blocked(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(blocked.error_code, ErrorCode::CommandFailed);
        // The hash chain did not advance
        assert_eq!(
            engine.store().get_proof_hash(&step.uuid).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn optional_shell_failure_still_advances() {
        let engine = engine(false);
        let step = shell_step(false);
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution = shell_solution(&challenge.nonce, GENESIS_HASH, 2);
        let (_, record) = expect_accepted(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(record.status, ProofStatus::Failed);
    }

    #[tokio::test]
    async fn retries_escalate_after_limit() {
        let engine = engine(false);
        let step = comment_step();
        let mut challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        for attempt in 1..=4u32 {
            let solution = comment_solution(&challenge.nonce, GENESIS_HASH, "no");
            let blocked = expect_blocked(
                engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
            );
            assert_eq!(blocked.retry_count, attempt);
            if attempt <= 3 {
                assert!(blocked.must_obey);
                assert_eq!(blocked.error_code, ErrorCode::CommentTooShort);
                challenge = blocked.challenge.expect("challenge while retries remain");
            } else {
                assert!(!blocked.must_obey);
                assert_eq!(blocked.error_code, ErrorCode::MaxRetriesExceeded);
                assert!(blocked.challenge.is_none());
                assert!(blocked.next_action.contains("kairos_update"));
                assert!(blocked.next_action.contains("kairos_attest"));
                assert!(blocked.next_action.contains("human"));
            }
        }
    }

    #[tokio::test]
    async fn success_resets_the_retry_counter() {
        let engine = engine(false);
        let step = comment_step();

        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();
        let bad = comment_solution(&challenge.nonce, GENESIS_HASH, "no");
        let blocked = expect_blocked(engine.validate(&step, &bad, GENESIS_HASH).await.unwrap());
        assert_eq!(blocked.retry_count, 1);

        let challenge = blocked.challenge.unwrap();
        let good = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "I ran the build successfully.",
        );
        expect_accepted(engine.validate(&step, &good, GENESIS_HASH).await.unwrap());

        // Counter restarted from zero
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();
        let bad = comment_solution(&challenge.nonce, GENESIS_HASH, "no");
        let blocked = expect_blocked(engine.validate(&step, &bad, GENESIS_HASH).await.unwrap());
        assert_eq!(blocked.retry_count, 1);
    }

    #[tokio::test]
    async fn repeated_success_returns_the_original_hash() {
        let engine = engine(false);
        let step = comment_step();

        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();
        let solution = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "I ran the build and it completed.",
        );
        let (first_hash, _) = expect_accepted(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );

        // A fresh, fully valid submission for the same step reuses the
        // stored outcome instead of re-recording it
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();
        let solution = comment_solution(
            &challenge.nonce,
            GENESIS_HASH,
            "I ran the build one more time.",
        );
        let (second_hash, _) = expect_accepted(
            engine.validate(&step, &solution, GENESIS_HASH).await.unwrap(),
        );
        assert_eq!(first_hash, second_hash);
    }

    #[tokio::test]
    async fn deprecated_alias_hash_field_validates() {
        let engine = engine(false);
        let step = comment_step();
        let challenge = engine.build_challenge(&step, GENESIS_HASH).await.unwrap();

        let solution: Solution = serde_json::from_value(serde_json::json!({
            "type": "comment",
            "nonce": challenge.nonce,
            "previousProofHash": GENESIS_HASH,
            "comment": { "text": "I ran the build and it completed." }
        }))
        .unwrap();
        expect_accepted(engine.validate(&step, &solution, GENESIS_HASH).await.unwrap());
    }
}
