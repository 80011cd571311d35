//! Error taxonomy for the platform
//!
//! Every subsystem defines its own error enum; all of them classify into an
//! [`ErrorKind`] so the CLI can map any failure to a process exit code and
//! callers can branch on recoverability without matching subsystem variants.

use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Platform-wide error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed command or parameters; recovered locally
    Validation,
    /// Missing subscription, strategy, schedule, or source
    NotFound,
    /// Unresolved state divergence, surfaced with the conflict set
    Conflict,
    /// Downstream guarded call refused; non-retryable within the window
    CircuitOpen,
    /// Per-operation deadline breach
    Timeout,
    /// A resource cap was reached
    Capacity,
    /// Persistence failure after bounded retry
    Storage,
    /// Invariant violation; fatal for the affected operation only
    Internal,
}

impl ErrorKind {
    /// Process exit code for CLI-driven operations
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::Conflict => 3,
            ErrorKind::CircuitOpen => 4,
            ErrorKind::Timeout => 5,
            _ => 1,
        }
    }
}

/// Classification trait implemented by every subsystem error
pub trait Classify {
    /// Platform-wide kind for exit codes and retry decisions
    fn kind(&self) -> ErrorKind;

    /// Correlation identifier (event id, decision id, session id) if the
    /// failure is attributable to one
    fn correlation(&self) -> Option<String> {
        None
    }
}

/// Errors raised by the shared kernel itself
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed command or parameter value
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Unknown command name
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration value out of range
    #[error("invalid configuration for '{key}': {message}")]
    ConfigValue { key: String, message: String },

    /// Unknown runtime configuration key
    #[error("unknown configuration key: {0}")]
    UnknownConfigKey(String),

    /// Filesystem failure while loading configuration
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation { .. }
            | CoreError::ConfigValue { .. }
            | CoreError::Config(_) => ErrorKind::Validation,
            CoreError::UnknownCommand(_) | CoreError::UnknownConfigKey(_) => ErrorKind::NotFound,
            CoreError::Io(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ErrorKind::Validation, 2)]
    #[test_case(ErrorKind::Conflict, 3)]
    #[test_case(ErrorKind::CircuitOpen, 4)]
    #[test_case(ErrorKind::Timeout, 5)]
    #[test_case(ErrorKind::NotFound, 1)]
    #[test_case(ErrorKind::Capacity, 1)]
    #[test_case(ErrorKind::Storage, 1)]
    #[test_case(ErrorKind::Internal, 1)]
    fn test_exit_code_mapping(kind: ErrorKind, expected: i32) {
        assert_eq!(kind.exit_code(), expected);
    }

    #[test]
    fn test_core_error_classification() {
        let err = CoreError::Validation {
            field: "limit".to_string(),
            message: "expected integer".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = CoreError::UnknownCommand("bogus".to_string());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
