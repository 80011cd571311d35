//! Ordered middleware chain
//!
//! Middleware runs before dispatch in registration order. A step may
//! transform the event, drop it (`Ok(None)`, not an error), or abort the
//! publish (`Err`).

use crate::error::{EventError, EventResult};
use crate::event::Event;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One step of the publish pipeline
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// Name used in error attribution and telemetry
    fn name(&self) -> &str;

    /// Transform or filter the event; `None` drops it silently
    async fn process(&self, event: Event) -> EventResult<Option<Event>>;
}

/// Run the chain in order, stopping on drop or error
pub(crate) async fn run_chain(
    chain: &[Arc<dyn EventMiddleware>],
    mut event: Event,
) -> EventResult<Option<Event>> {
    for step in chain {
        match step.process(event).await {
            Ok(Some(next)) => event = next,
            Ok(None) => {
                tracing::debug!(middleware = step.name(), "event dropped by middleware");
                return Ok(None);
            }
            Err(EventError::Middleware { name, message }) => {
                return Err(EventError::Middleware { name, message })
            }
            Err(e) => {
                return Err(EventError::Middleware {
                    name: step.name().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(Some(event))
}

/// Drops events failing a predicate
pub struct FilterMiddleware {
    name: String,
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

impl FilterMiddleware {
    pub fn new(name: &str, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            predicate: Arc::new(predicate),
        }
    }
}

#[async_trait]
impl EventMiddleware for FilterMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: Event) -> EventResult<Option<Event>> {
        if (self.predicate)(&event) {
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }
}

/// Injects static metadata entries into every event
pub struct EnrichMiddleware {
    name: String,
    entries: BTreeMap<String, Value>,
}

impl EnrichMiddleware {
    pub fn new(name: &str, entries: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            entries,
        }
    }
}

#[async_trait]
impl EventMiddleware for EnrichMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut event: Event) -> EventResult<Option<Event>> {
        for (key, value) in &self.entries {
            event.metadata.insert(key.clone(), value.clone());
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_core::EventId;

    fn sample(event_type: &str) -> Event {
        Event {
            id: EventId::new("mwtest01", 1),
            event_type: event_type.to_string(),
            data: Value::Null,
            timestamp: Utc::now(),
            source: "test".to_string(),
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    struct FailingMiddleware;

    #[async_trait]
    impl EventMiddleware for FailingMiddleware {
        fn name(&self) -> &str {
            "failing"
        }
        async fn process(&self, _event: Event) -> EventResult<Option<Event>> {
            Err(EventError::Internal("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_filter_drops_without_error() {
        let chain: Vec<Arc<dyn EventMiddleware>> = vec![Arc::new(FilterMiddleware::new(
            "no-debug",
            |e| !e.event_type.starts_with("debug."),
        ))];

        let kept = run_chain(&chain, sample("order.created")).await.unwrap();
        assert!(kept.is_some());

        let dropped = run_chain(&chain, sample("debug.noise")).await.unwrap();
        assert!(dropped.is_none());
    }

    #[tokio::test]
    async fn test_enrich_adds_metadata() {
        let mut entries = BTreeMap::new();
        entries.insert("env".to_string(), Value::String("test".to_string()));
        let chain: Vec<Arc<dyn EventMiddleware>> =
            vec![Arc::new(EnrichMiddleware::new("enrich", entries))];

        let event = run_chain(&chain, sample("a")).await.unwrap().unwrap();
        assert_eq!(event.metadata.get("env"), Some(&Value::String("test".to_string())));
    }

    #[tokio::test]
    async fn test_error_aborts_and_names_middleware() {
        let chain: Vec<Arc<dyn EventMiddleware>> = vec![Arc::new(FailingMiddleware)];
        let err = run_chain(&chain, sample("a")).await.unwrap_err();
        match err {
            EventError::Middleware { name, .. } => assert_eq!(name, "failing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_registration_order() {
        let mut first = BTreeMap::new();
        first.insert("step".to_string(), Value::String("first".to_string()));
        let mut second = BTreeMap::new();
        second.insert("step".to_string(), Value::String("second".to_string()));

        let chain: Vec<Arc<dyn EventMiddleware>> = vec![
            Arc::new(EnrichMiddleware::new("first", first)),
            Arc::new(EnrichMiddleware::new("second", second)),
        ];

        let event = run_chain(&chain, sample("a")).await.unwrap().unwrap();
        // Later middleware wins the shared key
        assert_eq!(event.metadata.get("step"), Some(&Value::String("second".to_string())));
    }
}
