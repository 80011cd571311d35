//! Integration sessions
//!
//! A session is a bounded-lifetime container collecting results from many
//! sources. The status machine only moves forward:
//! Collecting -> Fusing -> Analyzing -> Generating -> Completed, with Failed
//! reachable from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tandem_core::SessionId;

/// Session pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Collecting,
    Fusing,
    Analyzing,
    Generating,
    Completed,
    Failed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Collecting => 1,
            SessionStatus::Fusing => 2,
            SessionStatus::Analyzing => 3,
            SessionStatus::Generating => 4,
            SessionStatus::Completed => 5,
            SessionStatus::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Caller-supplied attribution for one result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Source tag, e.g. an agent name
    pub source: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Errors the source hit while producing the result
    pub error_count: u32,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self {
            source: "unknown".to_string(),
            confidence: 0.5,
            error_count: 0,
        }
    }
}

/// One collected result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    pub result_id: String,
    pub source: String,
    pub confidence: f64,
    pub error_count: u32,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ResultItem {
    /// Fusion weight: confidence discounted by accumulated errors
    pub fn weight(&self) -> f64 {
        self.confidence * (1.0 / (1.0 + f64::from(self.error_count)))
    }
}

/// A bounded-lifetime container for multi-source result integration
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationSession {
    pub id: SessionId,
    pub status: SessionStatus,
    pub results: BTreeMap<String, ResultItem>,
    /// result ids per source tag
    pub by_source: BTreeMap<String, Vec<String>>,
    /// Results accepted but not yet processed (real-time mode)
    pub pending: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    next_result: u64,
}

impl IntegrationSession {
    pub fn new(deadline: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Collecting,
            results: BTreeMap::new(),
            by_source: BTreeMap::new(),
            pending: BTreeSet::new(),
            created_at: Utc::now(),
            deadline,
            next_result: 0,
        }
    }

    /// Append a result; only legal while collecting
    pub fn add_result(&mut self, data: Value, metadata: ResultMetadata) -> Option<String> {
        if self.status != SessionStatus::Collecting {
            return None;
        }
        self.next_result += 1;
        let result_id = format!("res-{:04}", self.next_result);
        let item = ResultItem {
            result_id: result_id.clone(),
            source: metadata.source.clone(),
            confidence: metadata.confidence.clamp(0.0, 1.0),
            error_count: metadata.error_count,
            data,
            timestamp: Utc::now(),
        };
        self.by_source
            .entry(metadata.source)
            .or_default()
            .push(result_id.clone());
        self.pending.insert(result_id.clone());
        self.results.insert(result_id.clone(), item);
        Some(result_id)
    }

    /// Move forward in the pipeline; backwards transitions are rejected
    pub fn advance(&mut self, to: SessionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if to == SessionStatus::Failed || to.rank() > self.status.rank() {
            self.status = to;
            true
        } else {
            false
        }
    }

    pub fn items(&self) -> Vec<&ResultItem> {
        self.results.values().collect()
    }
}
