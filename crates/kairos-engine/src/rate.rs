//! The `attest` operation: record a run outcome on a step and refresh its
//! quality.

use chrono::Utc;
use std::time::Instant;
use tracing::debug;

use kairos_types::error::Operation;
use kairos_types::{AttestResponse, AttestResult, Outcome};

use crate::engine::{metadata, ExecutionEngine};
use crate::{quality, EngineError};

impl ExecutionEngine {
    /// Rate a finished (or abandoned) run.
    pub async fn attest(
        &self,
        uri: &str,
        outcome: Outcome,
        message: &str,
        quality_bonus: Option<f64>,
        rater: Option<&str>,
        space: Option<&str>,
    ) -> Result<AttestResponse, EngineError> {
        let started = Instant::now();
        let spaces = self.allowed_spaces(space);
        let mut step = self.load_step(uri, &spaces, Operation::Attest).await?;

        let basic_bonus = match outcome {
            Outcome::Success => 1.0,
            Outcome::Failure => -0.2,
        };
        let implementation_bonus = quality::implementation_bonus(&step);
        let total = basic_bonus + implementation_bonus + quality_bonus.unwrap_or(0.0);

        let now = Utc::now();
        let metrics = &mut step.quality_metrics;
        metrics.retrieval_count += 1;
        match outcome {
            Outcome::Success => metrics.success_count += 1,
            Outcome::Failure => metrics.failure_count += 1,
        }
        metrics.last_rated = Some(now);
        metrics.last_rater = rater.map(str::to_string);
        metrics.quality_bonus = total;
        metrics.usage_context = Some(message.to_string());

        let (score, label) = quality::rescore(&step);
        step.quality_metadata.step_quality_score = score;
        step.quality_metadata.step_quality = label;

        self.memory
            .put_payload(&step)
            .await
            .map_err(|err| EngineError::backend(Operation::Attest, err))?;
        debug!("Attested {uri} as {outcome:?} (bonus {total:.2})");

        Ok(AttestResponse {
            results: vec![AttestResult {
                uri: uri.to_string(),
                outcome,
                quality_bonus: total,
                message: message.to_string(),
                rated_at: now,
            }],
            total_rated: 1,
            total_failed: 0,
            metadata: Some(metadata(started)),
        })
    }
}
