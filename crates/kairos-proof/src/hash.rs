//! Canonical proof hashing and nonce generation.

use kairos_types::ProofRecord;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::ProofError;

/// Hex SHA-256 over the canonical (RFC 8785, key-sorted) JSON form of a
/// proof record. Key order of the source JSON never affects the digest.
pub fn canonical_proof_hash(record: &ProofRecord) -> Result<String, ProofError> {
    let canonical = serde_jcs::to_string(record)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Fresh 16-byte hex nonce.
pub fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
