//! Error types for the event subsystem

use tandem_core::error::{Classify, ErrorKind};
use tandem_core::SubscriptionId;
use thiserror::Error;

/// Result type for event operations
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised by the bus, store, and serializer
#[derive(Error, Debug)]
pub enum EventError {
    /// Publish attempted before `init()`
    #[error("event bus is not initialized")]
    NotInitialized,

    /// In-flight cap reached and queueing is disabled
    #[error("concurrency exceeded: {active} dispatches in flight")]
    ConcurrencyExceeded { active: usize },

    /// In-flight cap reached and the overflow queue is full
    #[error("publish queue is full ({queued} queued)")]
    QueueFull { queued: usize },

    /// `wait_for` deadline elapsed without a matching event
    #[error("timed out waiting for '{pattern}'")]
    WaitTimeout { pattern: String },

    /// Unknown subscription id
    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// A middleware step failed; the publish is aborted
    #[error("middleware '{name}' failed: {message}")]
    Middleware { name: String, message: String },

    /// Event could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Persistence failure after bounded retry
    #[error("store error: {0}")]
    Storage(String),

    /// Replay requires persistence to be enabled
    #[error("replay unavailable: persistence is disabled")]
    ReplayUnavailable,

    /// Internal invariant violation
    #[error("internal event bus error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EventError {
    fn from(err: std::io::Error) -> Self {
        EventError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}

impl Classify for EventError {
    fn kind(&self) -> ErrorKind {
        match self {
            EventError::NotInitialized => ErrorKind::Validation,
            EventError::ConcurrencyExceeded { .. } | EventError::QueueFull { .. } => {
                ErrorKind::Capacity
            }
            EventError::WaitTimeout { .. } => ErrorKind::Timeout,
            EventError::SubscriptionNotFound(_) => ErrorKind::NotFound,
            EventError::Middleware { .. } | EventError::Serialization(_) => ErrorKind::Validation,
            EventError::Storage(_) => ErrorKind::Storage,
            EventError::ReplayUnavailable => ErrorKind::Validation,
            EventError::Internal(_) => ErrorKind::Internal,
        }
    }
}
