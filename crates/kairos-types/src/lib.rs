//! Core data model for the KAIROS protocol engine: steps, chains, proof
//! definitions and records, challenges, solutions, response shapes, and the
//! `kairos://mem/<uuid>` identity scheme.

pub mod error;
pub mod ids;
pub mod markers;
pub mod proof;
pub mod response;
pub mod solution;
pub mod step;
pub mod uri;

pub use error::ErrorCode;
pub use ids::{chain_id, normalize_label, CHAIN_NAMESPACE, GENESIS_HASH};
pub use proof::{
    Challenge, CommentProof, McpProof, ProofDefinition, ProofParams, ProofRecord, ProofStatus,
    ProofType, ShellProof, UserInputProof,
};
pub use response::{
    AttestResponse, AttestResult, BatchItemResult, BlockedPayload, Choice, ChoiceRole, CurrentStep,
    DeleteResponse, MintItem, MintResponse, Outcome, ResponseMetadata, SearchResponse,
    StepResponse, UpdateResponse,
};
pub use solution::{CommentSolution, McpSolution, ShellSolution, Solution, UserInputSolution};
pub use step::{ChainRef, QualityMetadata, QualityMetrics, Step};
pub use uri::{memory_uri, parse_memory_uri, UriError, CREATE_PROTOCOL_UUID, REFINE_PROTOCOL_UUID};
