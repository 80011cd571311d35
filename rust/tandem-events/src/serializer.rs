//! Versioned event encoding
//!
//! Wire format is UTF-8 JSON, one record per line. Required fields are
//! `{id, type, timestamp, source, data}`; consumers ignore unknown fields so
//! newer producers can add fields without breaking older readers.

use crate::error::{EventError, EventResult};
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tandem_core::EventId;

/// Current schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted envelope around an [`Event`]
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default = "default_version")]
    schema_version: u32,
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    source: String,
    data: Value,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

fn default_version() -> u32 {
    1
}

/// Encoder/decoder for persisted event records
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSerializer;

impl EventSerializer {
    /// Encode an event as a single JSON line (no trailing newline)
    pub fn encode(&self, event: &Event) -> EventResult<String> {
        let record = StoredRecord {
            schema_version: SCHEMA_VERSION,
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            source: event.source.clone(),
            data: event.data.clone(),
            priority: event.priority,
            metadata: event.metadata.clone(),
        };
        Ok(serde_json::to_string(&record)?)
    }

    /// Decode a stored line back into an event
    ///
    /// Records with a schema version newer than this build are rejected;
    /// anything at or below the current version decodes, with unknown fields
    /// ignored and optional fields defaulted.
    pub fn decode(&self, line: &str) -> EventResult<Event> {
        let record: StoredRecord = serde_json::from_str(line)?;
        if record.schema_version > SCHEMA_VERSION {
            return Err(EventError::Serialization(format!(
                "unsupported schema version {} (max {})",
                record.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(Event {
            id: record.id,
            event_type: record.event_type,
            data: record.data,
            timestamp: record.timestamp,
            source: record.source,
            priority: record.priority,
            metadata: record.metadata,
        })
    }
}
