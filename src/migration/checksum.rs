//! Checksum calculation for migration definitions

use crate::migration::MigrationDefinition;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// The parts of a definition that determine its schema effect
#[derive(Serialize)]
struct ChecksumContent<'a> {
    dependencies: &'a [crate::migration::MigrationId],
    replaces: &'a [crate::migration::MigrationId],
    operations: &'a [crate::migration::Operation],
}

/// Calculate the SHA-256 checksum of a migration definition
///
/// This is used to detect definitions that were edited after being applied.
/// The hash covers the canonical JSON encoding of dependencies, `replaces`
/// and operations; the identity itself is not hashed so a record and its
/// definition can be compared directly.
///
/// # Returns
///
/// Returns the hexadecimal SHA-256 hash of the definition content
#[must_use]
pub fn calculate_checksum(definition: &MigrationDefinition) -> String {
    let content = ChecksumContent {
        dependencies: &definition.dependencies,
        replaces: &definition.replaces,
        operations: &definition.operations,
    };

    // Serializing plain data structs with string keys cannot fail
    let encoded = serde_json::to_vec(&content).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    let hash = hasher.finalize();

    format!("{:x}", hash)
}

/// Validate checksum against stored value
///
/// Comparison ignores ASCII case so ledgers that store upper-case hex still match.
#[must_use]
pub fn validate_checksum(stored_checksum: &str, current_checksum: &str) -> bool {
    stored_checksum.trim().eq_ignore_ascii_case(current_checksum.trim())
}
