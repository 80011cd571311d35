//! Platform-level error wrapper
//!
//! Wraps every subsystem error behind one type so the CLI can map any
//! failure to its process exit code through the shared classification.

use tandem_core::error::{Classify, ErrorKind};
use thiserror::Error;

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Any failure surfaced by the composed runtime
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error(transparent)]
    Core(#[from] tandem_core::CoreError),

    #[error(transparent)]
    Events(#[from] tandem_events::EventError),

    #[error(transparent)]
    Sync(#[from] tandem_state::SyncError),

    #[error(transparent)]
    Router(#[from] tandem_router::RouterError),

    #[error(transparent)]
    Circuit(#[from] tandem_resilience::CircuitError),

    #[error(transparent)]
    Integrator(#[from] tandem_integrator::IntegratorError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for PlatformError {
    fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Core(e) => e.kind(),
            PlatformError::Events(e) => e.kind(),
            PlatformError::Sync(e) => e.kind(),
            PlatformError::Router(e) => e.kind(),
            PlatformError::Circuit(e) => e.kind(),
            PlatformError::Integrator(e) => e.kind(),
            PlatformError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl PlatformError {
    /// Process exit code for CLI-driven operations
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}
