//! Deterministic identities: chain ids derived from normalized labels and the
//! genesis constant anchoring every proof hash chain.

use uuid::Uuid;

/// Hex SHA-256 of the string `genesis`, the predecessor hash for step 1.
pub const GENESIS_HASH: &str = "aeebad4a796fcc2e15dc4c6061b45ed9b373f26adfc798ca7d2d8cc58182718e";

/// UUIDv5 namespace under which chain ids are derived.
pub const CHAIN_NAMESPACE: Uuid = Uuid::from_bytes(*b"kairos-protocol!");

/// Normalize a chain label: lowercase with whitespace runs collapsed to a
/// single space.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the deterministic chain id for a label.
///
/// Two labels differing only in case or whitespace map to the same id, which
/// is what makes duplicate-chain detection possible without a registry.
pub fn chain_id(label: &str) -> Uuid {
    Uuid::new_v5(&CHAIN_NAMESPACE, normalize_label(label).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_label("  Build\tand   Test "), "build and test");
        assert_eq!(normalize_label("Build and Test"), "build and test");
    }

    #[test]
    fn chain_id_is_deterministic_across_spacing_and_case() {
        let a = chain_id("Build and Test");
        let b = chain_id("  build   AND test");
        assert_eq!(a, b);

        let c = chain_id("Deploy to Production");
        assert_ne!(a, c);
    }

    #[test]
    fn chain_id_is_v5() {
        assert_eq!(chain_id("anything").get_version_num(), 5);
    }
}
