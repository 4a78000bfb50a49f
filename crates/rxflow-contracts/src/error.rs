//! Error taxonomy for the rxflow prescription pipeline.
//!
//! All fallible pipeline operations return `RxResult<T>`. Variants carry
//! enough context to produce actionable audit entries and user-facing
//! messages without echoing patient clinical detail.

use thiserror::Error;

/// The unified error type for the rxflow pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RxError {
    /// Malformed or missing required input (empty rationale, unverified PIN,
    /// unconfirmed visual check, incomplete handoff checklist).
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The actor is unknown or its role may not perform the action.
    #[error("actor '{actor}' is not authorized to {action}: {reason}")]
    Authorization {
        actor: String,
        action: String,
        reason: String,
    },

    /// The transition is illegal from the prescription's current stage, or
    /// its guard is not satisfied.
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// Optimistic version mismatch or a duplicate open hold.
    ///
    /// The only variant a caller should retry, after re-reading state.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// No record exists for the given id.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// An external collaborator (inventory, sale draft, label printer, ...)
    /// failed or timed out.
    #[error("{collaborator} call failed: {reason}")]
    Collaborator {
        collaborator: &'static str,
        reason: String,
    },

    /// A configuration document is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// An audit or ledger append could not be persisted.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },
}

impl RxError {
    /// True only for errors a caller may retry after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RxError::Conflict { .. })
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        RxError::Validation { reason: reason.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        RxError::InvalidState { reason: reason.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        RxError::Conflict { reason: reason.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RxError::NotFound { entity, id: id.to_string() }
    }

    pub fn collaborator(collaborator: &'static str, reason: impl Into<String>) -> Self {
        RxError::Collaborator { collaborator, reason: reason.into() }
    }
}

/// Convenience alias used throughout the rxflow crates.
pub type RxResult<T> = Result<T, RxError>;
