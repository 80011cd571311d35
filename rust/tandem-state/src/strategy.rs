//! Sync timing strategies
//!
//! Immediate syncs run per change. Batch mode coalesces changes keyed by
//! `(source, target)` and flushes on size or time; entries older than the
//! wait cap are dropped before flush. Scheduled mode ticks at a fixed
//! interval per named schedule.

use crate::conflict::deep_merge;
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Pluggable synchronization timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Sync on every change
    Immediate,
    /// Coalesce changes within a window
    Batch,
    /// Fixed-interval sync
    Scheduled,
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "batch" => Ok(Self::Batch),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(SyncError::Internal(format!("unknown sync mode: {other}"))),
        }
    }
}

/// A coalesced pending change awaiting flush
#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub source: String,
    pub target: String,
    pub payload: Value,
    pub first_seen: Instant,
    /// Set when later changes were merged into this entry
    pub merged: bool,
}

/// Pending changes keyed by `(source, target)`
pub(crate) struct BatchQueue {
    pending: Mutex<HashMap<(String, String), PendingChange>>,
    max_batch_size: usize,
    max_wait: Duration,
}

impl BatchQueue {
    pub(crate) fn new(max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_batch_size: max_batch_size.max(1),
            max_wait,
        }
    }

    /// Coalesce a change; returns true when the size threshold was reached
    pub(crate) fn offer(&self, source: &str, target: &str, payload: Value) -> bool {
        let mut pending = self.pending.lock();
        let key = (source.to_string(), target.to_string());
        match pending.get_mut(&key) {
            Some(existing) => {
                // Later wins for scalars; objects deep-merge
                existing.payload = match (&existing.payload, &payload) {
                    (Value::Object(_), Value::Object(_)) => deep_merge(&existing.payload, &payload),
                    _ => payload,
                };
                existing.merged = true;
            }
            None => {
                pending.insert(
                    key,
                    PendingChange {
                        source: source.to_string(),
                        target: target.to_string(),
                        payload,
                        first_seen: Instant::now(),
                        merged: false,
                    },
                );
            }
        }
        pending.len() >= self.max_batch_size
    }

    /// Drain everything still within the wait cap; expired entries drop
    pub(crate) fn drain(&self) -> Vec<PendingChange> {
        let mut pending = self.pending.lock();
        let mut drained: Vec<PendingChange> = Vec::new();
        let mut expired = 0;
        for (_, change) in pending.drain() {
            if change.first_seen.elapsed() > self.max_wait {
                expired += 1;
            } else {
                drained.push(change);
            }
        }
        if expired > 0 {
            tracing::warn!(expired, "dropped expired batched changes");
        }
        drained.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Bookkeeping for one named schedule
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduleStatus {
    pub name: String,
    pub source: String,
    pub target: String,
    pub interval_ms: u64,
    pub ticks: u64,
    pub skipped: u64,
    pub last_sync: Option<DateTime<Utc>>,
}
