//! Step records as persisted on vector store point payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proof::ProofDefinition;

/// Default scoping token for steps minted without an explicit space.
pub const DEFAULT_SPACE_ID: &str = "public";

/// Reference tying a step to its chain and position within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRef {
    pub id: Uuid,
    pub label: String,
    /// 1-based position within the chain.
    pub step_index: u32,
    pub step_count: u32,
}

impl ChainRef {
    pub fn is_head(&self) -> bool {
        self.step_index == 1
    }

    pub fn is_tail(&self) -> bool {
        self.step_index == self.step_count
    }
}

/// Derived quality summary shown to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetadata {
    pub step_quality_score: f64,
    pub step_quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivational_text: Option<String>,
}

impl Default for QualityMetadata {
    fn default() -> Self {
        Self {
            step_quality_score: 0.5,
            step_quality: "unrated".to_string(),
            motivational_text: None,
        }
    }
}

/// Raw usage counters feeding the quality score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    #[serde(default)]
    pub retrieval_count: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rater: Option<String>,
    #[serde(default)]
    pub quality_bonus: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_context: Option<String>,
}

/// One memory point: a step of a protocol chain.
///
/// The serialized form is exactly the point payload; the uuid lives on the
/// point id and is re-attached after retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(skip)]
    pub uuid: Uuid,
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub text: String,
    pub llm_model_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_space_id")]
    pub space_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub quality_metadata: QualityMetadata,
    #[serde(default)]
    pub quality_metrics: QualityMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_of_work: Option<ProofDefinition>,
    /// Unknown payload keys found on read survive round-trips here.
    #[serde(flatten)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

fn default_space_id() -> String {
    DEFAULT_SPACE_ID.to_string()
}

impl Step {
    /// The proof definition governing this step, substituting the implicit
    /// confirmation for steps minted without one.
    pub fn effective_proof(&self) -> ProofDefinition {
        self.proof_of_work
            .clone()
            .unwrap_or_else(ProofDefinition::implicit_confirmation)
    }

    /// Whether this step is a system-seeded protocol (excluded from ranking
    /// and protected from deletion).
    pub fn is_system(&self) -> bool {
        self.kind.as_deref() == Some("system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_step() -> Step {
        Step {
            uuid: Uuid::new_v4(),
            label: "Run the build".to_string(),
            tags: vec!["build".to_string()],
            text: "Run make and check the output.".to_string(),
            llm_model_id: "test-model".to_string(),
            created_at: Utc::now(),
            space_id: DEFAULT_SPACE_ID.to_string(),
            task: None,
            kind: None,
            quality_metadata: QualityMetadata::default(),
            quality_metrics: QualityMetrics::default(),
            chain: Some(ChainRef {
                id: crate::chain_id("Build and Test"),
                label: "Build and Test".to_string(),
                step_index: 1,
                step_count: 2,
            }),
            proof_of_work: None,
            extensions: serde_json::Map::new(),
        }
    }

    #[test]
    fn payload_round_trip_preserves_unknown_keys() {
        let mut step = sample_step();
        step.extensions
            .insert("legacy_field".to_string(), serde_json::json!({"a": 1}));

        let payload = serde_json::to_value(&step).unwrap();
        assert_eq!(payload["legacy_field"]["a"], 1);
        // uuid never lands in the payload
        assert!(payload.get("uuid").is_none());

        let back: Step = serde_json::from_value(payload).unwrap();
        assert_eq!(back.extensions["legacy_field"]["a"], 1);
        assert_eq!(back.chain, step.chain);
    }

    #[test]
    fn missing_quality_blocks_default() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "label": "x",
            "text": "y",
            "llm_model_id": "m",
            "created_at": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(step.space_id, DEFAULT_SPACE_ID);
        assert_eq!(step.quality_metadata.step_quality, "unrated");
        assert_eq!(step.quality_metrics.retrieval_count, 0);
    }

    #[test]
    fn implicit_proof_for_unproofed_steps() {
        let step = sample_step();
        let def = step.effective_proof();
        assert!(!def.required);
    }
}
