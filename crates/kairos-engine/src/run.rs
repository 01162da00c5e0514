//! The `begin` and `next` operations driving a chain one step at a time.

use std::time::Instant;
use tracing::debug;

use kairos_proof::Verdict;
use kairos_types::error::Operation;
use kairos_types::{BlockedPayload, ErrorCode, Solution, StepResponse};

use crate::engine::{metadata, ExecutionEngine};
use crate::EngineError;

/// Outcome of a `next` call: either the run advanced or the submission was
/// rejected. Both are ordinary responses at the transport.
pub enum NextOutcome {
    Advanced(Box<StepResponse>),
    Blocked(Box<BlockedPayload>),
}

impl ExecutionEngine {
    /// Start (or restart) a run at step 1 of a chain.
    pub async fn begin(
        &self,
        uri: &str,
        space: Option<&str>,
    ) -> Result<StepResponse, EngineError> {
        let started = Instant::now();
        let spaces = self.allowed_spaces(space);
        let mut step = self.load_step(uri, &spaces, Operation::Begin).await?;
        let mut message = None;

        // A run always starts at the head, wherever the caller pointed
        if step.chain.as_ref().is_some_and(|chain| !chain.is_head()) {
            let first = self
                .memory
                .get_chain_first(&step, &spaces)
                .await
                .map_err(|err| EngineError::backend(Operation::Begin, err))?;
            if let Some(first) = first {
                debug!("begin({uri}) redirected to chain head {}", first.uuid);
                step = first;
                message = Some("Redirected to step 1 of this protocol chain.".to_string());
            }
        }

        // A fresh run is never a retry
        self.proof
            .store()
            .reset_retry(&step.uuid)
            .await
            .map_err(|err| EngineError::backend(Operation::Begin, err))?;

        let expected = self
            .expected_prev_hash(&step, &spaces, Operation::Begin)
            .await?;
        let challenge = self
            .proof
            .build_challenge(&step, &expected)
            .await
            .map_err(|err| EngineError::backend(Operation::Begin, err))?;
        let next = self
            .memory
            .get_chain_next(&step, &spaces)
            .await
            .map_err(|err| EngineError::backend(Operation::Begin, err))?;

        Ok(self.step_response(&step, Some(challenge), next.as_ref(), message, None, started))
    }

    /// Submit a solution for a step and, on acceptance, advance the run.
    pub async fn next(
        &self,
        uri: &str,
        solution: Option<Solution>,
        space: Option<&str>,
    ) -> Result<NextOutcome, EngineError> {
        let started = Instant::now();
        let spaces = self.allowed_spaces(space);
        let step = self.load_step(uri, &spaces, Operation::Next).await?;
        let expected = self
            .expected_prev_hash(&step, &spaces, Operation::Next)
            .await?;

        let Some(solution) = solution else {
            let verdict = self
                .proof
                .reject(
                    &step,
                    &expected,
                    ErrorCode::MissingField,
                    "Request is missing the solution object.",
                )
                .await
                .map_err(|err| EngineError::backend(Operation::Next, err))?;
            return Ok(finish_blocked(verdict, started));
        };

        let verdict = self
            .proof
            .validate(&step, &solution, &expected)
            .await
            .map_err(|err| EngineError::backend(Operation::Next, err))?;

        let proof_hash = match verdict {
            Verdict::Blocked(_) => return Ok(finish_blocked(verdict, started)),
            Verdict::Accepted { proof_hash, .. } => proof_hash,
        };

        let completed_position = step
            .chain
            .as_ref()
            .map(|chain| format!("Step {}/{} complete.", chain.step_index, chain.step_count));
        let next_step = self
            .memory
            .get_chain_next(&step, &spaces)
            .await
            .map_err(|err| EngineError::backend(Operation::Next, err))?;

        let response = match next_step {
            Some(next_step) => {
                let challenge = self
                    .proof
                    .build_challenge(&next_step, &proof_hash)
                    .await
                    .map_err(|err| EngineError::backend(Operation::Next, err))?;
                let after = self
                    .memory
                    .get_chain_next(&next_step, &spaces)
                    .await
                    .map_err(|err| EngineError::backend(Operation::Next, err))?;
                self.step_response(
                    &next_step,
                    Some(challenge),
                    after.as_ref(),
                    completed_position,
                    Some(proof_hash),
                    started,
                )
            }
            None => {
                // Chain exhausted: hand off to attest
                let uri = kairos_types::memory_uri(&step.uuid);
                let mut response = self.step_response(
                    &step,
                    None,
                    None,
                    Some("Run complete.".to_string()),
                    Some(proof_hash),
                    started,
                );
                response.next_action = format!(
                    "Run complete. call kairos_attest with {uri} and outcome \"success\" or \
                     \"failure\" to rate this protocol run."
                );
                response
            }
        };
        Ok(NextOutcome::Advanced(Box::new(response)))
    }
}

fn finish_blocked(verdict: Verdict, started: Instant) -> NextOutcome {
    match verdict {
        Verdict::Blocked(mut payload) => {
            payload.metadata = Some(metadata(started));
            NextOutcome::Blocked(payload)
        }
        Verdict::Accepted { .. } => unreachable!("finish_blocked called on acceptance"),
    }
}
