//! The `kairos://mem/<uuid>` identity scheme and the reserved sentinel URIs.

use thiserror::Error;
use uuid::{uuid, Uuid};

/// URI prefix for memory points.
pub const URI_PREFIX: &str = "kairos://mem/";

/// Sentinel uuid for the built-in create-new protocol. Never mintable.
pub const CREATE_PROTOCOL_UUID: Uuid = uuid!("00000000-0000-0000-0000-000000002001");

/// Sentinel uuid for the built-in refine-search protocol. Never mintable.
pub const REFINE_PROTOCOL_UUID: Uuid = uuid!("00000000-0000-0000-0000-000000002002");

/// Errors raised while parsing a memory URI.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UriError {
    #[error("URI must start with {URI_PREFIX}: {0}")]
    BadScheme(String),
    #[error("URI does not carry a canonical UUID: {0}")]
    BadUuid(String),
}

/// Format the canonical URI for a memory uuid.
pub fn memory_uri(uuid: &Uuid) -> String {
    format!("{URI_PREFIX}{uuid}")
}

/// Parse a `kairos://mem/<uuid>` URI into its uuid.
pub fn parse_memory_uri(uri: &str) -> Result<Uuid, UriError> {
    let rest = uri
        .strip_prefix(URI_PREFIX)
        .ok_or_else(|| UriError::BadScheme(uri.to_string()))?;
    Uuid::parse_str(rest).map_err(|_| UriError::BadUuid(uri.to_string()))
}

/// Whether a uuid is one of the reserved sentinels.
pub fn is_sentinel(uuid: &Uuid) -> bool {
    *uuid == CREATE_PROTOCOL_UUID || *uuid == REFINE_PROTOCOL_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trip() {
        let id = Uuid::new_v4();
        let uri = memory_uri(&id);
        assert_eq!(parse_memory_uri(&uri).unwrap(), id);
    }

    #[test]
    fn rejects_foreign_scheme() {
        assert!(matches!(
            parse_memory_uri("https://mem/00000000-0000-0000-0000-000000002001"),
            Err(UriError::BadScheme(_))
        ));
    }

    #[test]
    fn rejects_non_uuid_path() {
        assert!(matches!(
            parse_memory_uri("kairos://mem/not-a-uuid"),
            Err(UriError::BadUuid(_))
        ));
    }

    #[test]
    fn sentinels_are_recognized() {
        assert!(is_sentinel(&CREATE_PROTOCOL_UUID));
        assert!(is_sentinel(&REFINE_PROTOCOL_UUID));
        assert!(!is_sentinel(&Uuid::new_v4()));
    }
}
