//! Applied-migration ledger

use crate::error::AuditError;
use crate::migration::{AppliedRecord, MigrationId};
use std::collections::HashMap;

/// Validated, read-only view of the applied-migration records of one target
///
/// Records are kept sorted by order index. Construction enforces the ledger
/// contract: no duplicate identities and strictly increasing order indices.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<AppliedRecord>,
    index: HashMap<MigrationId, usize>,
}

impl Ledger {
    /// Build a ledger from provider output
    ///
    /// Records may arrive in any order; they are sorted by `order`.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::InvalidLedger` if an identity appears twice or two
    /// records share an order index.
    pub fn new(records: impl IntoIterator<Item = AppliedRecord>) -> Result<Self, AuditError> {
        let mut records: Vec<AppliedRecord> = records.into_iter().collect();
        records.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if index.insert(record.id.clone(), position).is_some() {
                return Err(AuditError::InvalidLedger(format!(
                    "migration {} is recorded more than once",
                    record.id
                )));
            }
            if position > 0 && records[position - 1].order >= record.order {
                return Err(AuditError::InvalidLedger(format!(
                    "migrations {} and {} share order index {}",
                    records[position - 1].id, record.id, record.order
                )));
            }
        }

        Ok(Self { records, index })
    }

    /// Build a ledger from identities, assigning order indices `0..n` in sequence
    ///
    /// # Errors
    ///
    /// Returns `AuditError::InvalidLedger` if an identity repeats.
    pub fn from_sequence(ids: impl IntoIterator<Item = MigrationId>) -> Result<Self, AuditError> {
        Self::new(
            ids.into_iter()
                .enumerate()
                .map(|(order, id)| AppliedRecord::new(id, order as u64)),
        )
    }

    #[must_use]
    pub fn contains(&self, id: &MigrationId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &MigrationId) -> Option<&AppliedRecord> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    #[must_use]
    pub fn order_of(&self, id: &MigrationId) -> Option<u64> {
        self.get(id).map(|record| record.order)
    }

    /// Records in application order
    pub fn iter(&self) -> impl Iterator<Item = &AppliedRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> MigrationId {
        MigrationId::new("app", name)
    }

    #[test]
    fn test_ledger_sorts_by_order() {
        let ledger = Ledger::new(vec![
            AppliedRecord::new(id("0002"), 7),
            AppliedRecord::new(id("0001"), 2),
        ])
        .unwrap();
        let names: Vec<&str> = ledger.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["0001", "0002"]);
        assert_eq!(ledger.order_of(&id("0002")), Some(7));
        assert!(ledger.contains(&id("0001")));
        assert!(!ledger.contains(&id("0003")));
    }

    #[test]
    fn test_ledger_rejects_duplicate_identity() {
        let err = Ledger::new(vec![
            AppliedRecord::new(id("0001"), 0),
            AppliedRecord::new(id("0001"), 1),
        ])
        .unwrap_err();
        assert!(matches!(err, AuditError::InvalidLedger(_)));
    }

    #[test]
    fn test_ledger_rejects_shared_order_index() {
        let err = Ledger::new(vec![
            AppliedRecord::new(id("0001"), 4),
            AppliedRecord::new(id("0002"), 4),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("share order index 4"));
    }

    #[test]
    fn test_from_sequence_assigns_order() {
        let ledger = Ledger::from_sequence(vec![id("0001"), id("0002")]).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.order_of(&id("0001")), Some(0));
        assert_eq!(ledger.order_of(&id("0002")), Some(1));
    }
}
