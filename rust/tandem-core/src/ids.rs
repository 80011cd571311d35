//! Correlation-friendly id newtypes
//!
//! Event ids are monotonic within a bus instance and globally unique through
//! the bus tag; everything else is uuid-backed. All ids serialize as plain
//! strings so persisted records stay greppable.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a published event: `evt-<bus>-<seq>`
///
/// Lexicographic order equals publish order within one bus instance because
/// the sequence component is zero-padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Build the id for sequence `seq` on the bus tagged `bus_tag`
    pub fn new(bus_tag: &str, seq: u64) -> Self {
        Self(format!("evt-{bus_tag}-{seq:012}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short random tag identifying one bus instance
pub fn bus_tag() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a live subscription
    SubscriptionId,
    "sub"
);
uuid_id!(
    /// Identifier of a routing decision
    DecisionId,
    "dec"
);
uuid_id!(
    /// Identifier of an integration session
    SessionId,
    "ses"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_orders_by_sequence() {
        let a = EventId::new("busaa", 1);
        let b = EventId::new("busaa", 2);
        let c = EventId::new("busaa", 100);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_event_id_display() {
        let id = EventId::new("abcd1234", 42);
        assert_eq!(id.to_string(), "evt-abcd1234-000000000042");
    }

    #[test]
    fn test_uuid_ids_are_unique_and_prefixed() {
        let a = DecisionId::new();
        let b = DecisionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("dec-"));
        assert!(SessionId::new().as_str().starts_with("ses-"));
        assert!(SubscriptionId::new().as_str().starts_with("sub-"));
    }

    #[test]
    fn test_event_id_serializes_transparent() {
        let id = EventId::new("abcd1234", 7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"evt-abcd1234-000000000007\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
