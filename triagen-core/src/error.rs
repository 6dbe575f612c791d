//! Caller-facing error taxonomy
//!
//! Every operation on the lifecycle manager, the escalation scheduler and the
//! subscription registry returns [`TriageResult`]. Collaborator failures
//! (store, blob store, delayed-task queue) are folded into
//! [`TriageError::Upstream`] through `From` conversions so `?` works across
//! the seams.

use thiserror::Error;

use crate::blob::BlobError;
use crate::scheduler::QueueError;
use crate::store::StoreError;

/// Result type alias for engine operations
pub type TriageResult<T> = Result<T, TriageError>;

/// Errors surfaced to callers of the engine
#[derive(Error, Debug)]
pub enum TriageError {
    /// Malformed input, rejected before reaching the store
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Incident, event, attachment, team or observer is absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Actor is not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Expected version did not match the stored version
    #[error("Version conflict on incident {incident_id}: expected {expected}, found {actual}")]
    Conflict {
        incident_id: String,
        expected: u64,
        actual: u64,
    },

    /// A collaborator (store, task queue, blob store) failed
    #[error("Upstream {collaborator} failure: {message}")]
    Upstream {
        collaborator: &'static str,
        message: String,
    },
}

impl TriageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(incident_id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            incident_id: incident_id.into(),
            expected,
            actual,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Conflict { .. } => "CONFLICT",
            Self::Upstream { .. } => "UPSTREAM",
        }
    }

    /// Whether the caller may retry after re-fetching state.
    ///
    /// Validation, NotFound and Forbidden need a different request; Conflict
    /// needs a fresh version; Upstream may clear on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Upstream { .. })
    }
}

impl From<StoreError> for TriageError {
    fn from(err: StoreError) -> Self {
        Self::Upstream {
            collaborator: "store",
            message: err.to_string(),
        }
    }
}

impl From<BlobError> for TriageError {
    fn from(err: BlobError) -> Self {
        Self::Upstream {
            collaborator: "blob store",
            message: err.to_string(),
        }
    }
}

impl From<QueueError> for TriageError {
    fn from(err: QueueError) -> Self {
        Self::Upstream {
            collaborator: "task queue",
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(TriageError::validation("x").code(), "VALIDATION");
        assert_eq!(TriageError::not_found("incident", "1").code(), "NOT_FOUND");
        assert_eq!(TriageError::forbidden("no").code(), "FORBIDDEN");
        assert_eq!(TriageError::conflict("1", 0, 1).code(), "CONFLICT");
    }

    #[test]
    fn test_only_conflict_and_upstream_are_retryable() {
        assert!(TriageError::conflict("inc-1", 2, 3).is_retryable());
        assert!(TriageError::from(StoreError::LockPoisoned).is_retryable());
        assert!(!TriageError::validation("empty title").is_retryable());
        assert!(!TriageError::forbidden("not the author").is_retryable());
        assert!(!TriageError::not_found("event", "e-1").is_retryable());
    }

    #[test]
    fn test_collaborator_errors_become_upstream() {
        let err: TriageError = StoreError::Unavailable("connection reset".into()).into();
        match err {
            TriageError::Upstream {
                collaborator,
                message,
            } => {
                assert_eq!(collaborator, "store");
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected upstream, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_message_names_versions() {
        let err = TriageError::conflict("inc-9", 4, 5);
        assert_eq!(
            err.to_string(),
            "Version conflict on incident inc-9: expected 4, found 5"
        );
    }
}
