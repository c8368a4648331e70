//! Fatal audit errors
//!
//! Anything in this module aborts the audit for a target. Inconsistencies that
//! are worth reporting but not worth stopping for are [`Violation`]s instead.
//!
//! [`Violation`]: crate::invariant::Violation

use crate::migration::MigrationId;

/// The migration graph contains a dependency cycle
///
/// `cycle` lists every member of one cycle in dependency order, starting at the
/// lexically smallest identity. The edge from the last member back to the first
/// closes the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicGraphError {
    pub cycle: Vec<MigrationId>,
}

impl std::fmt::Display for CyclicGraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<String> = self.cycle.iter().map(ToString::to_string).collect();
        match self.cycle.first() {
            Some(first) => write!(
                f,
                "Migration dependency cycle detected: {} -> {}",
                members.join(" -> "),
                first
            ),
            None => write!(f, "Migration dependency cycle detected"),
        }
    }
}

impl std::error::Error for CyclicGraphError {}

/// Errors that abort an audit run
#[derive(Debug)]
pub enum AuditError {
    /// The definition graph is cyclic
    CyclicGraph(CyclicGraphError),
    /// The loader returned definitions that break the loader contract
    InvalidDefinition(String),
    /// The ledger provider returned records that break the ledger contract
    InvalidLedger(String),
    /// Migration definitions could not be read
    Loader(String),
    /// Applied-migration records could not be read
    Ledger(String),
    /// The actual schema could not be introspected
    Introspection(String),
    /// Configuration could not be loaded
    Config(String),
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::CyclicGraph(e) => write!(f, "{e}"),
            AuditError::InvalidDefinition(msg) => {
                write!(f, "Invalid migration definition: {msg}")
            }
            AuditError::InvalidLedger(msg) => {
                write!(
                    f,
                    "Invalid applied-migration ledger: {msg}\n\
                     Ledger records must have unique identities and strictly increasing order indices"
                )
            }
            AuditError::Loader(msg) => write!(f, "Failed to load migration definitions: {msg}"),
            AuditError::Ledger(msg) => write!(f, "Failed to read applied-migration ledger: {msg}"),
            AuditError::Introspection(msg) => {
                write!(f, "Failed to introspect actual schema: {msg}")
            }
            AuditError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuditError::CyclicGraph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CyclicGraphError> for AuditError {
    fn from(error: CyclicGraphError) -> Self {
        AuditError::CyclicGraph(error)
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(error: config::ConfigError) -> Self {
        AuditError::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_closes_loop() {
        let err = CyclicGraphError {
            cycle: vec![
                MigrationId::new("app", "0001_a"),
                MigrationId::new("app", "0002_b"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Migration dependency cycle detected: app.0001_a -> app.0002_b -> app.0001_a"
        );
    }

    #[test]
    fn test_cyclic_graph_converts_into_audit_error() {
        let err: AuditError = CyclicGraphError { cycle: vec![] }.into();
        assert!(matches!(err, AuditError::CyclicGraph(_)));
    }
}
