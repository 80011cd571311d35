//! Error types for the resilience subsystem

use crate::breaker::CircuitState;
use tandem_core::error::{Classify, ErrorKind};
use thiserror::Error;

/// Result type for circuit operations
pub type CircuitResult<T> = Result<T, CircuitError>;

/// Errors raised by breakers and the registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError {
    /// The circuit refused the call
    #[error("circuit '{name}' is {state:?}; call refused")]
    Open { name: String, state: CircuitState },

    /// Registry cap reached
    #[error("circuit registry is full ({max} circuits)")]
    RegistryFull { max: usize },

    /// Unknown circuit name
    #[error("circuit '{0}' not found")]
    NotFound(String),

    /// Rejected breaker configuration
    #[error("invalid circuit configuration: {0}")]
    InvalidConfig(String),
}

impl Classify for CircuitError {
    fn kind(&self) -> ErrorKind {
        match self {
            CircuitError::Open { .. } => ErrorKind::CircuitOpen,
            CircuitError::RegistryFull { .. } => ErrorKind::Capacity,
            CircuitError::NotFound(_) => ErrorKind::NotFound,
            CircuitError::InvalidConfig(_) => ErrorKind::Validation,
        }
    }
}
