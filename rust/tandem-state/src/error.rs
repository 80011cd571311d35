//! Error types for the state subsystem

use crate::conflict::Conflict;
use tandem_core::error::{Classify, ErrorKind};
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the store, resolver, and synchronizer
#[derive(Error, Debug)]
pub enum SyncError {
    /// Unknown source name
    #[error("no such source: {0}")]
    NoSuchSource(String),

    /// Unknown schedule name
    #[error("no such schedule: {0}")]
    NoSuchSchedule(String),

    /// Unknown resolution strategy name
    #[error("unknown resolution strategy: {0}")]
    UnknownStrategy(String),

    /// Critical conflicts the selected strategy could not resolve
    #[error("{} conflict(s) left unresolved", conflicts.len())]
    ConflictUnresolved { conflicts: Vec<Conflict> },

    /// Snapshot persistence failed; the sync was aborted atomically
    #[error("state storage error: {0}")]
    Storage(String),

    /// Source payload could not be read or parsed
    #[error("source read error for '{source_name}': {message}")]
    SourceRead { source_name: String, message: String },

    /// Filesystem watcher failure
    #[error("watcher error: {0}")]
    Watcher(String),

    /// Internal invariant violation
    #[error("internal sync error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NoSuchSource(_)
            | SyncError::NoSuchSchedule(_)
            | SyncError::UnknownStrategy(_) => ErrorKind::NotFound,
            SyncError::ConflictUnresolved { .. } => ErrorKind::Conflict,
            SyncError::Storage(_) | SyncError::SourceRead { .. } => ErrorKind::Storage,
            SyncError::Watcher(_) => ErrorKind::Internal,
            SyncError::Internal(_) => ErrorKind::Internal,
        }
    }
}
