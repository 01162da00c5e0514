//! Built-in system protocols seeded at startup under their sentinel uuids.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use kairos_types::error::Operation;
use kairos_types::{Step, CREATE_PROTOCOL_UUID, REFINE_PROTOCOL_UUID};

use crate::engine::ExecutionEngine;
use crate::EngineError;

const CREATE_PROTOCOL_BODY: &str = "\
When no stored protocol fits the task, write one and mint it.\n\n\
1. Draft a markdown document: one `#` heading naming the protocol, one `##` \
heading per step, and a fenced `json` block with a `challenge` object after \
each step that needs proof.\n\
2. Call kairos_mint with the document and your model id.\n\
3. Run the freshly minted protocol with kairos_begin to verify it works, \
then attest the outcome.";

const REFINE_PROTOCOL_BODY: &str = "\
The previous search did not surface what you need.\n\n\
1. Restate the task in different words: name the tool, the artifact, or the \
outcome instead of the activity.\n\
2. Call kairos_search again with the reworded query.\n\
3. If two refinements still find nothing, follow the create-new protocol \
instead of searching a third time.";

impl ExecutionEngine {
    /// Mint the built-in protocols when absent. Runs on every boot; the
    /// sentinel uuids make it idempotent.
    pub async fn seed_system_memories(&self) -> Result<(), EngineError> {
        let seeds = [
            (
                CREATE_PROTOCOL_UUID,
                "Create a new protocol",
                CREATE_PROTOCOL_BODY,
            ),
            (
                REFINE_PROTOCOL_UUID,
                "Refine a search",
                REFINE_PROTOCOL_BODY,
            ),
        ];

        for (uuid, label, body) in seeds {
            let existing = self
                .memory
                .get(uuid, &[])
                .await
                .map_err(|err| EngineError::backend(Operation::Store, err))?;
            if existing.is_some() {
                continue;
            }
            info!("Seeding system protocol '{label}' ({uuid})");
            let step = system_step(uuid, label, body);
            self.memory
                .put_step(&step)
                .await
                .map_err(|err| EngineError::backend(Operation::Store, err))?;
        }
        Ok(())
    }
}

fn system_step(uuid: Uuid, label: &str, body: &str) -> Step {
    Step {
        uuid,
        label: label.to_string(),
        tags: vec!["system".to_string()],
        text: body.to_string(),
        llm_model_id: "system".to_string(),
        created_at: Utc::now(),
        space_id: "public".to_string(),
        task: None,
        kind: Some("system".to_string()),
        quality_metadata: Default::default(),
        quality_metrics: Default::default(),
        chain: None,
        proof_of_work: None,
        extensions: Default::default(),
    }
}
