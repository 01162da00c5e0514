//! Unified response shapes for the operation surface.
//!
//! Only the current ("V2") shape exists here: every response that expects a
//! follow-up carries a string `next_action` with an embedded URI, and blocked
//! proof outcomes are plain payloads rather than transport errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::proof::Challenge;

/// Timing (and cache) information attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

/// Role of a search choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceRole {
    Match,
    Refine,
    Create,
}

/// One selectable result of `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub uri: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub role: ChoiceRole,
    pub tags: Vec<String>,
    pub next_action: String,
}

/// Response of `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub must_obey: bool,
    pub message: String,
    pub next_action: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// The step an agent is currently on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStep {
    pub uri: String,
    pub content: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl CurrentStep {
    pub fn markdown(uri: String, content: String) -> Self {
        Self {
            uri,
            content,
            mime_type: "text/markdown".to_string(),
        }
    }
}

/// Response of `begin` and of a successful `next`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub must_obey: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub current_step: CurrentStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    pub next_action: String,
    /// Hash of the proof just accepted, echoed back by the agent on the
    /// following `next` call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Payload returned when a proof submission is rejected. `must_obey` stays
/// true while retries remain, then flips once escalation gives the agent
/// back its autonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedPayload {
    pub must_obey: bool,
    #[serde(with = "error_code_str")]
    pub error_code: ErrorCode,
    pub message: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    pub next_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Attest outcome reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// One rated step inside the `attest` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestResult {
    pub uri: String,
    pub outcome: Outcome,
    pub quality_bonus: f64,
    pub message: String,
    pub rated_at: DateTime<Utc>,
}

/// Response of `attest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestResponse {
    pub results: Vec<AttestResult>,
    pub total_rated: u32,
    pub total_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// One stored step inside the `mint` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintItem {
    pub uri: String,
    pub memory_uuid: Uuid,
    pub label: String,
    pub tags: Vec<String>,
}

/// Response of `mint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintResponse {
    pub status: String,
    pub items: Vec<MintItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Per-uri outcome of a batch `update` or `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub uri: String,
    pub status: String,
    pub message: String,
}

/// Response of `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub results: Vec<BatchItemResult>,
    pub total_updated: u32,
    pub total_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

/// Response of `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub results: Vec<BatchItemResult>,
    pub total_deleted: u32,
    pub total_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

mod error_code_str {
    //! Serialize an [`ErrorCode`] as its string form and read it back.

    use super::*;
    use serde::de::{Deserializer, Error as _};

    pub fn serialize<S: serde::Serializer>(
        code: &ErrorCode,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&code.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ErrorCode, D::Error> {
        use crate::error::Operation::*;
        let raw = String::deserialize(deserializer)?;
        let code = match raw.as_str() {
            "INVALID_INPUT" => ErrorCode::InvalidInput,
            "MISSING_FIELD" => ErrorCode::MissingField,
            "NONCE_MISMATCH" => ErrorCode::NonceMismatch,
            "PROOF_HASH_MISMATCH" => ErrorCode::ProofHashMismatch,
            "TYPE_MISMATCH" => ErrorCode::TypeMismatch,
            "COMMENT_TOO_SHORT" => ErrorCode::CommentTooShort,
            "COMMENT_IRRELEVANT" => ErrorCode::CommentIrrelevant,
            "COMMAND_FAILED" => ErrorCode::CommandFailed,
            "MAX_RETRIES_EXCEEDED" => ErrorCode::MaxRetriesExceeded,
            "DUPLICATE_CHAIN" => ErrorCode::DuplicateChain,
            "NOT_FOUND" => ErrorCode::NotFound,
            "USER_DECLINED" => ErrorCode::UserDeclined,
            "ELICITATION_FAILED" => ErrorCode::ElicitationFailed,
            "SEARCH_FAILED" => ErrorCode::BackendFailed(Search),
            "BEGIN_FAILED" => ErrorCode::BackendFailed(Begin),
            "NEXT_FAILED" => ErrorCode::BackendFailed(Next),
            "ATTEST_FAILED" => ErrorCode::BackendFailed(Attest),
            "STORE_FAILED" => ErrorCode::BackendFailed(Store),
            "UPDATE_FAILED" => ErrorCode::BackendFailed(Update),
            "DELETE_FAILED" => ErrorCode::BackendFailed(Delete),
            other => return Err(D::Error::custom(format!("unknown error code: {other}"))),
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_payload_round_trip() {
        let payload = BlockedPayload {
            must_obey: true,
            error_code: ErrorCode::CommentTooShort,
            message: "comment too short".to_string(),
            retry_count: 2,
            challenge: None,
            next_action: "retry kairos_next with kairos://mem/... -- use nonce and proof_hash from THIS response's challenge".to_string(),
            metadata: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["error_code"], "COMMENT_TOO_SHORT");
        let back: BlockedPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn current_step_uses_mime_type_key() {
        let step = CurrentStep::markdown("kairos://mem/x".to_string(), "body".to_string());
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["mimeType"], "text/markdown");
    }
}
