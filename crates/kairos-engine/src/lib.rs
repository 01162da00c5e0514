//! Execution engine: the `search -> begin -> next* -> attest` state machine
//! plus the `mint`/`update`/`delete` administration surface.

mod admin;
mod engine;
mod quality;
mod rate;
mod run;
mod search;
mod seed;

pub use engine::{EngineConfig, ExecutionEngine};
pub use run::NextOutcome;

use kairos_types::error::Operation;
use kairos_types::MintItem;
use thiserror::Error;

/// Errors the engine surfaces across the transport boundary. Blocked proof
/// payloads are not errors; they are regular responses.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request input (bad URI, empty query, missing field).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The URI resolves to no step.
    #[error("not found: {0}")]
    NotFound(String),
    /// Mint collision without `force_update`; carries the existing items.
    #[error("chain '{label}' already exists")]
    DuplicateChain { label: String, items: Vec<MintItem> },
    /// Transient infrastructure failure, wrapped per operation.
    #[error("{op:?} failed: {message}")]
    Backend { op: Operation, message: String },
}

impl EngineError {
    fn backend(op: Operation, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            op,
            message: err.to_string(),
        }
    }
}
