//! `AppliedRecord` - Represents entries in a target database's applied-migration ledger

use crate::migration::MigrationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One migration the target database claims to have applied
///
/// `order` is the monotonic sequence number assigned by the ledger. Records
/// written by tools that track checksums may also carry the checksum of the
/// definition at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub id: MigrationId,

    /// Application order index (strictly increasing across the ledger)
    pub order: u64,

    /// When the migration was applied (`None` if the ledger does not record it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,

    /// `SHA-256` checksum of the definition when it was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl AppliedRecord {
    /// Create a new `AppliedRecord` without timestamp or checksum
    #[must_use]
    pub fn new(id: MigrationId, order: u64) -> Self {
        Self {
            id,
            order,
            applied_at: None,
            checksum: None,
        }
    }

    #[must_use]
    pub fn applied_at(mut self, applied_at: DateTime<Utc>) -> Self {
        self.applied_at = Some(applied_at);
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_deserializes_with_optional_fields() {
        let json = r#"{"id": "blog.0001_initial", "order": 3, "applied_at": "2024-01-20T12:00:00Z"}"#;
        let record: AppliedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, MigrationId::new("blog", "0001_initial"));
        assert_eq!(record.order, 3);
        assert!(record.applied_at.is_some());
        assert!(record.checksum.is_none());
    }
}
