//! Versioned state snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A versioned materialized state for a logical key
///
/// Versions are strictly increasing per `type_key`; history is append-only
/// and old versions may be pruned by retention policy but never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Unique id of this snapshot (`<type_key>@v<version>`)
    pub state_id: String,
    /// Logical key the snapshot materializes
    pub type_key: String,
    pub version: u64,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl StateSnapshot {
    pub(crate) fn next(
        type_key: &str,
        version: u64,
        payload: Value,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            state_id: format!("{type_key}@v{version}"),
            type_key: type_key.to_string(),
            version,
            payload,
            timestamp: Utc::now(),
            metadata,
        }
    }
}
