//! Event bus: dispatch, back-pressure, batching, replay
//!
//! Dispatch walks the matching subscriptions (type-specific before global,
//! stable-sorted by descending priority) and hands each one a delivery job on
//! its ordered queue. A dispatch is complete when every delivery finished;
//! completions free slots counted against `max_concurrent_events`, and
//! overflow publishes wait in a FIFO queue bounded by `max_queue_size`.

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::middleware::{run_chain, EventMiddleware};
use crate::store::{EventStore, ReplayOptions, StoreStats};
use crate::subscription::{
    EventFilter, EventHandler, Pattern, SubscribeOptions, Subscription, SubscriptionStats,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tandem_core::config::EventsConfig;
use tandem_core::ids::bus_tag;
use tandem_core::{EventId, SubscriptionId};
use tokio::sync::mpsc;

/// Options for a single publish
#[derive(Clone)]
pub struct PublishOptions {
    /// Logical origin recorded on the event
    pub source: String,
    pub priority: i32,
    /// Persist the event when the bus has a store
    pub persist: bool,
    /// Participate in store-write batching when enabled
    pub batch: bool,
    /// Invoke handlers one after another instead of in parallel
    pub sequential: bool,
    pub metadata: BTreeMap<String, Value>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            source: "app".to_string(),
            priority: 0,
            persist: true,
            batch: true,
            sequential: false,
            metadata: BTreeMap::new(),
        }
    }
}

/// Options for [`EventBus::wait_for`]
#[derive(Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub filter: Option<EventFilter>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            filter: None,
        }
    }
}

/// Bus counters for status reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub dropped_by_middleware: u64,
    pub dispatched: u64,
    pub telemetry_emitted: u64,
    pub in_flight: usize,
    pub queued: usize,
    pub subscriptions: usize,
    pub store: Option<StoreStats>,
}

struct QueuedPublish {
    event: Event,
    sequential: bool,
}

struct BusInner {
    config: EventsConfig,
    tag: String,
    seq: AtomicU64,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    store: Option<EventStore>,
    middleware: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    by_type: DashMap<String, Vec<Arc<Subscription>>>,
    globals: RwLock<Vec<Arc<Subscription>>>,
    index: DashMap<SubscriptionId, Arc<Subscription>>,
    in_flight: AtomicUsize,
    queue: Mutex<VecDeque<QueuedPublish>>,
    batch: Mutex<Vec<Event>>,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    telemetry: AtomicU64,
}

/// In-process publish/subscribe backbone
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus persisting under `<data_dir>/events` when the config
    /// enables persistence
    pub fn new(config: EventsConfig, data_dir: &Path) -> Self {
        let store = config.persistence.then(|| EventStore::new(data_dir));
        Self::build(config, store)
    }

    /// Create a bus with no store; replay is unavailable
    pub fn in_memory(config: EventsConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: EventsConfig, store: Option<EventStore>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                tag: bus_tag(),
                seq: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                store,
                middleware: RwLock::new(Vec::new()),
                by_type: DashMap::new(),
                globals: RwLock::new(Vec::new()),
                index: DashMap::new(),
                in_flight: AtomicUsize::new(0),
                queue: Mutex::new(VecDeque::new()),
                batch: Mutex::new(Vec::new()),
                flush_task: Mutex::new(None),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                telemetry: AtomicU64::new(0),
            }),
        }
    }

    /// Prepare the store and start the batch flush timer
    pub async fn init(&self) -> EventResult<()> {
        if self.inner.config.batching && self.inner.store.is_some() {
            let weak = Arc::downgrade(&self.inner);
            let interval = Duration::from_millis(self.inner.config.batch_interval_ms.max(1));
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    if inner.shutting_down.load(Ordering::Acquire) {
                        break;
                    }
                    BusInner::flush_batch(&inner).await;
                }
            });
            *self.inner.flush_task.lock() = Some(task);
        }
        self.inner.initialized.store(true, Ordering::Release);
        tracing::info!(bus = %self.inner.tag, persistence = self.inner.store.is_some(), "event bus initialized");
        Ok(())
    }

    /// Register a middleware step at the end of the chain
    pub fn add_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        self.inner.middleware.write().push(middleware);
    }

    /// Publish an event; returns `None` when middleware filtered it
    pub async fn publish(
        &self,
        event_type: &str,
        data: Value,
        options: PublishOptions,
    ) -> EventResult<Option<EventId>> {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::Acquire) {
            return Err(EventError::NotInitialized);
        }

        let seq = inner.seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id: EventId::new(&inner.tag, seq),
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
            source: options.source.clone(),
            priority: options.priority,
            metadata: options.metadata.clone(),
        };

        let chain = inner.middleware.read().clone();
        let event = match run_chain(&chain, event).await? {
            Some(event) => event,
            None => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };
        let event_id = event.id.clone();
        inner.published.fetch_add(1, Ordering::Relaxed);

        if options.persist && !event.is_telemetry() {
            self.persist(&event, options.batch).await;
        }

        // Admission under the queue lock: either take a dispatch slot or
        // join the FIFO overflow queue.
        let admitted = {
            let mut queue = inner.queue.lock();
            let active = inner.in_flight.load(Ordering::SeqCst);
            if active < inner.config.max_concurrent_events {
                inner.in_flight.fetch_add(1, Ordering::SeqCst);
                true
            } else if inner.config.max_queue_size == 0 {
                return Err(EventError::ConcurrencyExceeded { active });
            } else if queue.len() >= inner.config.max_queue_size {
                return Err(EventError::QueueFull {
                    queued: queue.len(),
                });
            } else {
                queue.push_back(QueuedPublish {
                    event: event.clone(),
                    sequential: options.sequential,
                });
                false
            }
        };

        if admitted {
            BusInner::dispatch(inner, Arc::new(event), options.sequential).await;
            BusInner::finish_and_drain(inner);
        }
        Ok(Some(event_id))
    }

    async fn persist(&self, event: &Event, batch: bool) {
        let inner = &self.inner;
        let Some(store) = &inner.store else { return };

        if inner.config.batching && batch {
            let flush_now = {
                let mut buffer = inner.batch.lock();
                buffer.push(event.clone());
                buffer.len() >= inner.config.batch_size
            };
            if flush_now {
                BusInner::flush_batch(inner).await;
            }
            return;
        }

        if let Err(e) = store.append(event).await {
            tracing::error!(event = %event.id, error = %e, "event store append failed");
            BusInner::emit_telemetry(
                inner,
                "bus.store.error",
                serde_json::json!({"event": event.id, "error": e.to_string()}),
            );
        }
    }

    /// Register a handler for a literal event type or `"*"`
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Arc::new(Subscription::new(
            Pattern::parse(pattern),
            handler,
            options,
            tx,
        ));
        let id = subscription.id.clone();

        match &subscription.pattern {
            Pattern::Type(event_type) => {
                self.inner
                    .by_type
                    .entry(event_type.clone())
                    .or_default()
                    .push(subscription.clone());
            }
            Pattern::All => self.inner.globals.write().push(subscription.clone()),
        }
        self.inner.index.insert(id.clone(), subscription.clone());

        let weak = Arc::downgrade(&self.inner);
        let timeout = Duration::from_millis(self.inner.config.handler_timeout_ms.max(1));
        tokio::spawn(BusInner::run_worker(weak, subscription, rx, timeout));

        tracing::debug!(subscription = %id, pattern, "subscription registered");
        id
    }

    /// Register a one-shot handler
    pub fn once(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        mut options: SubscribeOptions,
    ) -> SubscriptionId {
        options.once = true;
        self.subscribe(pattern, handler, options)
    }

    /// Remove a subscription; returns false when the id is unknown
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let Some((_, subscription)) = self.inner.index.remove(id) else {
            return false;
        };
        subscription.deactivate();
        match &subscription.pattern {
            Pattern::Type(event_type) => {
                if let Some(mut bucket) = self.inner.by_type.get_mut(event_type) {
                    bucket.retain(|s| &s.id != id);
                }
            }
            Pattern::All => self.inner.globals.write().retain(|s| &s.id != id),
        }
        true
    }

    /// Block until the first matching event arrives, or time out
    pub async fn wait_for(&self, pattern: &str, options: WaitOptions) -> EventResult<Event> {
        let (tx, rx) = tokio::sync::oneshot::channel::<Event>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let handler_slot = slot.clone();

        let id = self.subscribe(
            pattern,
            crate::subscription::handler_fn(move |event: Event| {
                let slot = handler_slot.clone();
                async move {
                    if let Some(sender) = slot.lock().take() {
                        let _ = sender.send(event);
                    }
                    Ok(())
                }
            }),
            SubscribeOptions {
                once: true,
                priority: i32::MAX,
                filter: options.filter.clone(),
            },
        );

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(EventError::Internal(
                "wait_for completion channel closed".to_string(),
            )),
            Err(_) => {
                self.unsubscribe(&id);
                Err(EventError::WaitTimeout {
                    pattern: pattern.to_string(),
                })
            }
        }
    }

    /// Replay stored events; requires persistence
    pub async fn replay(&self, options: &ReplayOptions) -> EventResult<Vec<Event>> {
        match &self.inner.store {
            Some(store) => store.replay(options).await,
            None => Err(EventError::ReplayUnavailable),
        }
    }

    /// Stream stored events through a visitor; requires persistence
    pub async fn replay_with<F>(&self, options: &ReplayOptions, visit: F) -> EventResult<usize>
    where
        F: FnMut(Event) -> EventResult<()>,
    {
        match &self.inner.store {
            Some(store) => store.replay_with(options, visit).await,
            None => Err(EventError::ReplayUnavailable),
        }
    }

    /// Wait until no dispatches are in flight and the queue is drained
    ///
    /// Returns false when the deadline elapses first.
    pub async fn quiesce(&self, deadline: Duration) -> bool {
        let start = Instant::now();
        loop {
            let idle = self.inner.in_flight.load(Ordering::SeqCst) == 0
                && self.inner.queue.lock().is_empty();
            if idle {
                return true;
            }
            if start.elapsed() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Drain outstanding work, flush pending store writes, stop timers
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        if !self.quiesce(Duration::from_secs(5)).await {
            tracing::warn!("event bus shutdown with work still in flight");
        }
        BusInner::flush_batch(&self.inner).await;
        if let Some(task) = self.inner.flush_task.lock().take() {
            task.abort();
        }
        self.inner.initialized.store(false, Ordering::Release);
        tracing::info!(bus = %self.inner.tag, "event bus shut down");
    }

    /// Stats for one subscription
    pub fn subscription_stats(&self, id: &SubscriptionId) -> Option<SubscriptionStats> {
        self.inner.index.get(id).map(|s| s.stats_snapshot())
    }

    /// Bus-level counters and store statistics
    pub async fn stats(&self) -> BusStats {
        let store = match &self.inner.store {
            Some(store) => store.stats().await.ok(),
            None => None,
        };
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dropped_by_middleware: self.inner.dropped.load(Ordering::Relaxed),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            telemetry_emitted: self.inner.telemetry.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            queued: self.inner.queue.lock().len(),
            subscriptions: self.inner.index.len(),
            store,
        }
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.index.len()
    }
}

impl BusInner {
    fn matching(&self, event_type: &str) -> Vec<Arc<Subscription>> {
        let mut subs: Vec<Arc<Subscription>> = Vec::new();
        if let Some(bucket) = self.by_type.get(event_type) {
            subs.extend(bucket.iter().filter(|s| s.is_active()).cloned());
        }
        subs.extend(self.globals.read().iter().filter(|s| s.is_active()).cloned());
        // Stable sort keeps type-specific before global within a priority
        subs.sort_by(|a, b| b.priority.cmp(&a.priority));
        subs
    }

    async fn dispatch(inner: &Arc<BusInner>, event: Arc<Event>, sequential: bool) {
        inner.dispatched.fetch_add(1, Ordering::Relaxed);
        let subs = inner.matching(&event.event_type);

        if sequential {
            for sub in &subs {
                if let Some(done) = sub.enqueue(event.clone()) {
                    let _ = done.await;
                }
            }
        } else {
            let receivers: Vec<_> = subs.iter().filter_map(|s| s.enqueue(event.clone())).collect();
            futures::future::join_all(receivers.into_iter().map(|done| async move {
                let _ = done.await;
            }))
            .await;
        }

        inner.sweep(&event.event_type);
    }

    /// Release the dispatch slot, or hand it to the next queued publish
    fn finish_and_drain(inner: &Arc<BusInner>) {
        let next = {
            let mut queue = inner.queue.lock();
            match queue.pop_front() {
                Some(next) => next,
                None => {
                    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            }
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            BusInner::dispatch(&inner, Arc::new(next.event), next.sequential).await;
            BusInner::finish_and_drain(&inner);
        });
    }

    /// Remove deactivated subscriptions after a dispatch
    fn sweep(&self, event_type: &str) {
        let mut removed = Vec::new();
        if let Some(mut bucket) = self.by_type.get_mut(event_type) {
            bucket.retain(|s| {
                if s.is_active() {
                    true
                } else {
                    removed.push(s.id.clone());
                    false
                }
            });
        }
        self.globals.write().retain(|s| {
            if s.is_active() {
                true
            } else {
                removed.push(s.id.clone());
                false
            }
        });
        for id in removed {
            self.index.remove(&id);
        }
    }

    /// Fire-and-forget internal event; never persisted, never recursive
    fn emit_telemetry(inner: &Arc<BusInner>, event_type: &str, data: Value) {
        if inner.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let seq = inner.seq.fetch_add(1, Ordering::SeqCst);
        let event = Arc::new(Event {
            id: EventId::new(&inner.tag, seq),
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
            source: "bus".to_string(),
            priority: 0,
            metadata: BTreeMap::new(),
        });
        inner.telemetry.fetch_add(1, Ordering::Relaxed);
        for sub in inner.matching(event_type) {
            let _ = sub.enqueue(event.clone());
        }
    }

    async fn flush_batch(inner: &Arc<BusInner>) {
        let drained: Vec<Event> = std::mem::take(&mut *inner.batch.lock());
        if drained.is_empty() {
            return;
        }
        let Some(store) = &inner.store else { return };
        if let Err(e) = store.append_batch(&drained).await {
            tracing::error!(count = drained.len(), error = %e, "batch flush failed");
            BusInner::emit_telemetry(
                inner,
                "bus.store.error",
                serde_json::json!({"count": drained.len(), "error": e.to_string()}),
            );
        }
    }

    async fn run_worker(
        weak: Weak<BusInner>,
        sub: Arc<Subscription>,
        mut rx: mpsc::UnboundedReceiver<crate::subscription::DeliveryJob>,
        handler_timeout: Duration,
    ) {
        while let Some(job) = rx.recv().await {
            let event = job.event;
            if !sub.is_active() {
                let _ = job.completion.send(());
                continue;
            }
            if let Some(filter) = &sub.filter {
                if !filter(&event) {
                    let _ = job.completion.send(());
                    continue;
                }
            }
            // One-shot reservation: exactly one delivery may proceed
            if sub.once
                && sub
                    .fired
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                let _ = job.completion.send(());
                continue;
            }

            let started = Instant::now();
            let outcome = tokio::time::timeout(handler_timeout, sub.handler.handle(&event)).await;
            let elapsed = started.elapsed();

            {
                let mut stats = sub.stats.lock();
                stats.invocations += 1;
                stats.last_invoked = Some(Utc::now());
                stats.total_duration_ms += elapsed.as_millis() as u64;
                match &outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => stats.failures += 1,
                    Err(_) => stats.timeouts += 1,
                }
            }

            match outcome {
                Ok(Ok(())) => {
                    if sub.once {
                        sub.deactivate();
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(subscription = %sub.id, event = %event.id, error = %e, "handler failed");
                    if sub.once {
                        sub.fired.store(false, Ordering::SeqCst);
                    }
                    if !event.is_telemetry() {
                        if let Some(inner) = weak.upgrade() {
                            BusInner::emit_telemetry(
                                &inner,
                                "bus.subscription.error",
                                serde_json::json!({
                                    "subscription": sub.id.as_str(),
                                    "event": event.id.as_str(),
                                    "error": e.to_string(),
                                }),
                            );
                        }
                    }
                }
                Err(_) => {
                    tracing::warn!(subscription = %sub.id, event = %event.id, "handler timed out");
                    if sub.once {
                        sub.fired.store(false, Ordering::SeqCst);
                    }
                    if !event.is_telemetry() {
                        if let Some(inner) = weak.upgrade() {
                            BusInner::emit_telemetry(
                                &inner,
                                "bus.handler.timeout",
                                serde_json::json!({
                                    "subscription": sub.id.as_str(),
                                    "event": event.id.as_str(),
                                }),
                            );
                        }
                    }
                }
            }
            let _ = job.completion.send(());
        }
    }
}
