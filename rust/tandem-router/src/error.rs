//! Error types for the routing subsystem

use tandem_core::error::{Classify, ErrorKind};
use tandem_core::DecisionId;
use thiserror::Error;

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors raised by the router, engine, and learning module
#[derive(Error, Debug)]
pub enum RouterError {
    /// Command failed the core parser or schema validation
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] tandem_core::CoreError),

    /// Unknown strategy name
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    /// No strategy accepted the analyzed command
    #[error("no applicable strategy for '{command}'")]
    NoCandidates { command: String },

    /// Unknown decision id
    #[error("decision {0} not found")]
    DecisionNotFound(DecisionId),

    /// A decision accepts feedback at most once
    #[error("feedback already recorded for decision {0}")]
    FeedbackAlreadyRecorded(DecisionId),

    /// A guarded plan step was refused by its circuit
    #[error("endpoint '{endpoint}' refused: circuit open")]
    EndpointRefused { endpoint: String },

    /// A plan step ran and failed
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    /// Sample or model persistence failure
    #[error("learning storage error: {0}")]
    Storage(String),

    /// Training could not produce a model; prediction falls back
    #[error("training error: {0}")]
    Training(String),

    /// Internal invariant violation
    #[error("internal router error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Storage(err.to_string())
    }
}

impl Classify for RouterError {
    fn kind(&self) -> ErrorKind {
        match self {
            RouterError::InvalidCommand(_) => ErrorKind::Validation,
            RouterError::UnknownStrategy(_) | RouterError::DecisionNotFound(_) => {
                ErrorKind::NotFound
            }
            RouterError::NoCandidates { .. } => ErrorKind::NotFound,
            RouterError::FeedbackAlreadyRecorded(_) => ErrorKind::Validation,
            RouterError::EndpointRefused { .. } => ErrorKind::CircuitOpen,
            RouterError::StepFailed { .. } => ErrorKind::Internal,
            RouterError::Storage(_) => ErrorKind::Storage,
            RouterError::Training(_) | RouterError::Internal(_) => ErrorKind::Internal,
        }
    }
}
