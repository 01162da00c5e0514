//! Client-submitted solutions answering a challenge.
//!
//! Fields the validation pipeline needs to inspect are optional here so a
//! structurally missing value surfaces as `MISSING_FIELD` from the proof
//! engine rather than a deserialization error at the transport boundary.

use serde::{Deserialize, Serialize};

use crate::proof::ProofType;

/// Evidence for a `shell` proof.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellSolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Evidence for an `mcp` proof.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpSolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Evidence for a `user_input` proof.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInputSolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Evidence for a `comment` proof.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentSolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A proof submission sent on `next`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub proof_type: Option<ProofType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Predecessor proof hash. `previousProofHash` is the deprecated alias
    /// older clients still send.
    #[serde(alias = "previousProofHash", skip_serializing_if = "Option::is_none")]
    pub proof_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input: Option<UserInputSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<CommentSolution>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_deprecated_previous_proof_hash_alias() {
        let solution: Solution = serde_json::from_value(serde_json::json!({
            "type": "comment",
            "nonce": "00ff",
            "previousProofHash": "abc123",
            "comment": { "text": "done" }
        }))
        .unwrap();
        assert_eq!(solution.proof_hash.as_deref(), Some("abc123"));
        assert_eq!(solution.proof_type, Some(ProofType::Comment));
    }

    #[test]
    fn tolerates_missing_blocks() {
        let solution: Solution = serde_json::from_value(serde_json::json!({
            "type": "shell",
            "nonce": "00ff",
            "proof_hash": "abc123"
        }))
        .unwrap();
        assert!(solution.shell.is_none());
    }
}
