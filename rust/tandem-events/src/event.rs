//! Immutable event records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tandem_core::EventId;

/// Prefix of bus-internal telemetry event types
///
/// Telemetry events are dispatched through the normal subscription path but
/// are never persisted and never generate further telemetry.
pub const TELEMETRY_PREFIX: &str = "bus.";

/// An immutable notification record published on the bus
///
/// Once stored, the record is never mutated; derivative records reference it
/// through their metadata instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique, monotonic within the publishing bus instance
    pub id: EventId,
    /// Event type, e.g. `order.created`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Logical origin of the event
    pub source: String,
    /// Dispatch priority; higher is delivered first
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Event {
    /// Whether this is a bus-internal telemetry event
    pub fn is_telemetry(&self) -> bool {
        self.event_type.starts_with(TELEMETRY_PREFIX)
    }

    /// Attach a metadata entry, returning the modified copy
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: EventId::new("testbus1", 1),
            event_type: "order.created".to_string(),
            data: serde_json::json!({"id": 1}),
            timestamp: Utc::now(),
            source: "test".to_string(),
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_telemetry_prefix_detection() {
        let mut event = sample();
        assert!(!event.is_telemetry());
        event.event_type = "bus.subscription.error".to_string();
        assert!(event.is_telemetry());
    }

    #[test]
    fn test_metadata_attachment_preserves_payload() {
        let event = sample().with_metadata("origin", serde_json::json!("replay"));
        assert_eq!(event.data, serde_json::json!({"id": 1}));
        assert_eq!(event.metadata.get("origin"), Some(&serde_json::json!("replay")));
    }
}
