//! Error codes carried at the API surface.

use serde::{Serialize, Serializer};

/// Machine-readable error code strings surfaced in response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    MissingField,
    NonceMismatch,
    ProofHashMismatch,
    TypeMismatch,
    CommentTooShort,
    CommentIrrelevant,
    CommandFailed,
    MaxRetriesExceeded,
    DuplicateChain,
    NotFound,
    UserDeclined,
    ElicitationFailed,
    /// Transient infrastructure failure wrapped per operation, e.g.
    /// `SEARCH_FAILED`.
    BackendFailed(Operation),
}

/// Operations that can wrap a transient backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Begin,
    Next,
    Attest,
    Store,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "SEARCH",
            Operation::Begin => "BEGIN",
            Operation::Next => "NEXT",
            Operation::Attest => "ATTEST",
            Operation::Store => "STORE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::NonceMismatch => "NONCE_MISMATCH",
            ErrorCode::ProofHashMismatch => "PROOF_HASH_MISMATCH",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::CommentTooShort => "COMMENT_TOO_SHORT",
            ErrorCode::CommentIrrelevant => "COMMENT_IRRELEVANT",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::DuplicateChain => "DUPLICATE_CHAIN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::UserDeclined => "USER_DECLINED",
            ErrorCode::ElicitationFailed => "ELICITATION_FAILED",
            ErrorCode::BackendFailed(op) => return write!(f, "{}_FAILED", op.as_str()),
        };
        f.write_str(code)
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_as_screaming_snake() {
        assert_eq!(ErrorCode::NonceMismatch.to_string(), "NONCE_MISMATCH");
        assert_eq!(
            ErrorCode::BackendFailed(Operation::Search).to_string(),
            "SEARCH_FAILED"
        );
    }

    #[test]
    fn codes_serialize_as_strings() {
        let json = serde_json::to_value(ErrorCode::MaxRetriesExceeded).unwrap();
        assert_eq!(json, "MAX_RETRIES_EXCEEDED");
    }
}
