//! Subscription bookkeeping
//!
//! Each subscription owns an ordered delivery queue drained by a dedicated
//! worker task, so one subscription always observes events in publish order
//! while different subscriptions run in parallel.

use crate::error::EventResult;
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tandem_core::SubscriptionId;
use tokio::sync::{mpsc, oneshot};

/// Predicate applied before a subscription's handler is invoked
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Handler bound to a subscription
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> EventResult<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = EventResult<()>> + Send,
{
    async fn handle(&self, event: &Event) -> EventResult<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EventResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Options for [`crate::EventBus::subscribe`]
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Deactivate after the first successful invocation
    pub once: bool,
    /// Dispatch priority; higher handlers run first
    pub priority: i32,
    /// Only invoke the handler for events passing this predicate
    pub filter: Option<EventFilter>,
}

/// Per-subscription invocation statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionStats {
    pub invocations: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub last_invoked: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
}

/// Subscription pattern: a literal event type or all events
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pattern {
    Type(String),
    All,
}

impl Pattern {
    pub(crate) fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Pattern::All
        } else {
            Pattern::Type(pattern.to_string())
        }
    }
}

/// One delivery handed to a subscription worker
pub(crate) struct DeliveryJob {
    pub event: Arc<Event>,
    /// Dropped (or sent) when the delivery is finished, whatever the outcome
    pub completion: oneshot::Sender<()>,
}

/// A live registration binding a handler to an event pattern
pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub pattern: Pattern,
    pub priority: i32,
    pub once: bool,
    pub filter: Option<EventFilter>,
    pub handler: Arc<dyn EventHandler>,
    /// Inactive subscriptions receive no further events
    pub active: AtomicBool,
    /// One-shot reservation; compare-exchange ensures a single winner
    pub fired: AtomicBool,
    pub stats: Mutex<SubscriptionStats>,
    /// Taken on unsubscribe so the worker's channel closes and it exits
    pub sender: Mutex<Option<mpsc::UnboundedSender<DeliveryJob>>>,
}

impl Subscription {
    pub(crate) fn new(
        pattern: Pattern,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
        sender: mpsc::UnboundedSender<DeliveryJob>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            pattern,
            priority: options.priority,
            once: options.once,
            filter: options.filter,
            handler,
            active: AtomicBool::new(true),
            fired: AtomicBool::new(false),
            stats: Mutex::new(SubscriptionStats::default()),
            sender: Mutex::new(Some(sender)),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, std::sync::atomic::Ordering::Release);
        *self.sender.lock() = None;
    }

    /// Enqueue a delivery; returns the completion receiver, or `None` when
    /// the subscription is gone
    pub(crate) fn enqueue(&self, event: Arc<Event>) -> Option<oneshot::Receiver<()>> {
        if !self.is_active() {
            return None;
        }
        let sender = self.sender.lock().clone()?;
        let (tx, rx) = oneshot::channel();
        sender
            .send(DeliveryJob {
                event,
                completion: tx,
            })
            .ok()?;
        Some(rx)
    }

    pub(crate) fn stats_snapshot(&self) -> SubscriptionStats {
        self.stats.lock().clone()
    }
}
