//! Error types for the integration subsystem

use crate::session::SessionStatus;
use tandem_core::error::{Classify, ErrorKind};
use tandem_core::SessionId;
use thiserror::Error;

/// Result type for integration operations
pub type IntegratorResult<T> = Result<T, IntegratorError>;

/// Errors raised by sessions and the integrator
#[derive(Error, Debug)]
pub enum IntegratorError {
    /// Unknown session id
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Operation not legal in the session's current status
    #[error("session {id} is {actual:?}; expected {expected:?}")]
    InvalidStatus {
        id: SessionId,
        expected: SessionStatus,
        actual: SessionStatus,
    },

    /// The pipeline needs at least one collected result
    #[error("session {0} has no results to integrate")]
    NoResults(SessionId),

    /// Unknown fusion strategy name
    #[error("unknown fusion strategy: {0}")]
    UnknownFusionStrategy(String),

    /// Internal invariant violation
    #[error("internal integrator error: {0}")]
    Internal(String),
}

impl Classify for IntegratorError {
    fn kind(&self) -> ErrorKind {
        match self {
            IntegratorError::SessionNotFound(_) => ErrorKind::NotFound,
            IntegratorError::InvalidStatus { .. } | IntegratorError::NoResults(_) => {
                ErrorKind::Validation
            }
            IntegratorError::UnknownFusionStrategy(_) => ErrorKind::NotFound,
            IntegratorError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn correlation(&self) -> Option<String> {
        match self {
            IntegratorError::SessionNotFound(id)
            | IntegratorError::NoResults(id)
            | IntegratorError::InvalidStatus { id, .. } => Some(id.to_string()),
            _ => None,
        }
    }
}
