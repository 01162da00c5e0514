//! Proof-of-work definitions, server-issued challenges, and persisted proof
//! records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::solution::{CommentSolution, McpSolution, ShellSolution, UserInputSolution};

/// Default shell proof timeout in seconds.
pub const DEFAULT_SHELL_TIMEOUT_SECONDS: u32 = 60;

/// Default minimum comment length.
pub const DEFAULT_COMMENT_MIN_LENGTH: usize = 10;

/// The four supported proof-of-work disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Shell,
    Mcp,
    UserInput,
    Comment,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofType::Shell => "shell",
            ProofType::Mcp => "mcp",
            ProofType::UserInput => "user_input",
            ProofType::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ProofType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a `shell` proof: run a command, report the exit code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellProof {
    pub cmd: String,
    #[serde(default = "default_shell_timeout")]
    pub timeout_seconds: u32,
}

fn default_shell_timeout() -> u32 {
    DEFAULT_SHELL_TIMEOUT_SECONDS
}

/// Parameters for an `mcp` proof: invoke a tool, report the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpProof {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<serde_json::Value>,
}

/// Parameters for a `user_input` proof: obtain human confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInputProof {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Parameters for a `comment` proof: write a relevant free-text summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentProof {
    #[serde(default = "default_comment_min_length")]
    pub min_length: usize,
}

fn default_comment_min_length() -> usize {
    DEFAULT_COMMENT_MIN_LENGTH
}

/// Type-specific proof parameters, tagged by `type` with the parameter block
/// nested under the matching key (the persisted wire shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProofParams {
    Shell { shell: ShellProof },
    Mcp { mcp: McpProof },
    UserInput { user_input: UserInputProof },
    Comment { comment: CommentProof },
}

impl ProofParams {
    pub fn kind(&self) -> ProofType {
        match self {
            ProofParams::Shell { .. } => ProofType::Shell,
            ProofParams::Mcp { .. } => ProofType::Mcp,
            ProofParams::UserInput { .. } => ProofType::UserInput,
            ProofParams::Comment { .. } => ProofType::Comment,
        }
    }
}

/// A step's proof-of-work definition as persisted on the point payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofDefinition {
    #[serde(flatten)]
    pub params: ProofParams,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ProofDefinition {
    /// A required shell proof.
    pub fn shell(cmd: impl Into<String>, timeout_seconds: u32) -> Self {
        Self {
            params: ProofParams::Shell {
                shell: ShellProof {
                    cmd: cmd.into(),
                    timeout_seconds,
                },
            },
            required: true,
        }
    }

    /// The fallback proof for steps minted without an explicit definition:
    /// a non-required confirmation.
    pub fn implicit_confirmation() -> Self {
        Self {
            params: ProofParams::UserInput {
                user_input: UserInputProof {
                    prompt: Some("Confirm this step is complete.".to_string()),
                },
            },
            required: false,
        }
    }

    pub fn kind(&self) -> ProofType {
        self.params.kind()
    }

    /// Human-readable instruction rendered into the challenge.
    pub fn describe(&self) -> String {
        match &self.params {
            ProofParams::Shell { shell } => format!(
                "Run `{}` (timeout {}s) and submit the exit code.",
                shell.cmd, shell.timeout_seconds
            ),
            ProofParams::Mcp { mcp } => {
                format!("Invoke the `{}` tool and submit its result.", mcp.tool_name)
            }
            ProofParams::UserInput { user_input } => match &user_input.prompt {
                Some(prompt) => format!("Ask the user: {prompt}"),
                None => "Obtain user confirmation for this step.".to_string(),
            },
            ProofParams::Comment { comment } => format!(
                "Describe what you did for this step in at least {} characters.",
                comment.min_length
            ),
        }
    }
}

/// Server-issued challenge prescribing how to prove completion of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub proof_type: ProofType,
    pub description: String,
    /// 16-byte hex nonce, single-use, scoped to the step.
    pub nonce: String,
    /// Expected predecessor proof hash the solution must echo back.
    pub proof_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input: Option<UserInputProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<CommentProof>,
}

impl Challenge {
    /// Build a challenge mirroring a proof definition.
    pub fn from_definition(def: &ProofDefinition, nonce: String, prev_hash: String) -> Self {
        let mut challenge = Self {
            proof_type: def.kind(),
            description: def.describe(),
            nonce,
            proof_hash: prev_hash,
            shell: None,
            mcp: None,
            user_input: None,
            comment: None,
        };
        match &def.params {
            ProofParams::Shell { shell } => challenge.shell = Some(shell.clone()),
            ProofParams::Mcp { mcp } => challenge.mcp = Some(mcp.clone()),
            ProofParams::UserInput { user_input } => {
                challenge.user_input = Some(user_input.clone())
            }
            ProofParams::Comment { comment } => challenge.comment = Some(comment.clone()),
        }
        challenge
    }
}

/// Outcome status of one proof submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    Success,
    Failed,
}

/// Persisted outcome of one accepted submission. The canonical (key-sorted)
/// JSON form of this record is what gets hashed into the proof chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub result_id: Uuid,
    #[serde(rename = "type")]
    pub proof_type: ProofType,
    pub status: ProofStatus,
    pub executed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input: Option<UserInputSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<CommentSolution>,
}
