// Engine Error Types
// Fixed error-kind enum for engine-internal faults

use crate::execution::status::Status;

use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-internal faults.
///
/// Expected step failures never surface here: they are carried as status
/// values on the node execution. Only plan validation and registry lookups
/// at start time are raised to callers of `start_execution`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Structural plan problem (cycle, dangling edge, missing start node)
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Lookup of a type that was never registered
    #[error("unregistered {kind} type '{key}'")]
    UnregisteredType { kind: &'static str, key: String },

    /// Second registration of an already registered type
    #[error("{kind} type '{key}' is already registered")]
    DuplicateRegistration { kind: &'static str, key: String },

    /// Version conflict that survived the local retry budget
    #[error("concurrent modification of {entity} '{id}' after {attempts} attempts")]
    ConcurrentModification {
        entity: &'static str,
        id: String,
        attempts: u32,
    },

    /// No notify arrived for a correlation id before its TTL
    #[error("correlation '{0}' timed out")]
    CorrelationTimeout(String),

    /// Applying an interrupt effect failed
    #[error("interrupt '{id}' failed: {reason}")]
    InterruptProcessing { id: String, reason: String },

    /// Record not present in the store
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Transition rejected by the status partial order
    #[error("illegal transition {from} -> {to} on node execution '{node_execution_id}'")]
    IllegalTransition {
        node_execution_id: String,
        from: Status,
        to: Status,
    },

    /// Outputs are immutable once published
    #[error("output '{name}' already exists in scope '{scope}'")]
    OutputAlreadyExists { name: String, scope: String },

    /// Persistence collaborator failure
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn unregistered(kind: &'static str, key: impl Into<String>) -> Self {
        Self::UnregisteredType {
            kind,
            key: key.into(),
        }
    }

    pub fn interrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InterruptProcessing {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the operation as-is
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::unregistered("adviser", "RETRY");
        assert_eq!(err.to_string(), "unregistered adviser type 'RETRY'");

        let err = EngineError::IllegalTransition {
            node_execution_id: "n1".to_string(),
            from: Status::Succeeded,
            to: Status::Running,
        };
        assert_eq!(
            err.to_string(),
            "illegal transition SUCCEEDED -> RUNNING on node execution 'n1'"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::ConcurrentModification {
            entity: "node execution",
            id: "n1".into(),
            attempts: 3,
        }
        .is_transient());
        assert!(!EngineError::InvalidPlan("cycle".into()).is_transient());
    }
}
