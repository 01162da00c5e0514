//! Proof-of-work engine: per-step challenge issuance, submission validation,
//! and the SHA-256 hash chain linking consecutive steps of a protocol run.

mod engine;
mod hash;
mod store;

pub use engine::{ProofConfig, ProofEngine, Verdict};
pub use hash::{canonical_proof_hash, new_nonce};
pub use store::{ProofStore, PROOF_TTL};

use kairos_kv::KvError;
use thiserror::Error;

/// Infrastructure errors from the proof subsystem. Expected validation
/// failures are not errors; they come back as [`Verdict::Blocked`].
#[derive(Error, Debug)]
pub enum ProofError {
    #[error("proof store error: {0}")]
    Store(#[from] KvError),
    #[error("failed to canonicalize proof record: {0}")]
    Canonicalize(#[from] serde_json::Error),
}
