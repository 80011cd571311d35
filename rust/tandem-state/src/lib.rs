//! State synchronization engine
//!
//! Provides:
//! - Versioned keyed snapshots with append-only history ([`store`])
//! - Structural diffing with type tracking ([`diff`])
//! - Conflict detection and pluggable resolution ([`conflict`])
//! - Immediate / batch / scheduled sync timing ([`strategy`])
//! - Filesystem observation bound to sync triggers ([`watcher`])
//! - The orchestrating [`StateSynchronizer`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod conflict;
pub mod diff;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod synchronizer;
pub mod watcher;

pub use conflict::{
    Conflict, ConflictKind, ConflictResolver, DependencyRule, MergeWeights, Resolution,
    ResolutionRecord, ResolutionStrategy, Severity, ValidationRule,
};
pub use diff::{diff, FieldChange, StateDiff};
pub use error::{SyncError, SyncResult};
pub use snapshot::StateSnapshot;
pub use store::{CleanupReport, StateStore, StateStoreStats};
pub use strategy::{ScheduleStatus, SyncMode};
pub use synchronizer::{
    DifferenceReport, StateSynchronizer, SyncOptions, SyncOutcome, SynchronizerStatus, WatchOptions,
};
