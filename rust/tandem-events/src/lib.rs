//! In-process publish/subscribe backbone for the tandem platform
//!
//! Provides:
//! - Priority-ordered dispatch with per-subscription isolation and ordering
//! - Back-pressure with a bounded FIFO overflow queue
//! - Ordered middleware chain (transform / filter / abort)
//! - Optional append-only persistence with time/type replay
//! - Store-write batching
//! - One-shot primitives (`once`, `wait_for`) built on completion channels

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod bus;
pub mod error;
pub mod event;
pub mod middleware;
pub mod serializer;
pub mod store;
pub mod subscription;

pub use bus::{BusStats, EventBus, PublishOptions, WaitOptions};
pub use error::{EventError, EventResult};
pub use event::Event;
pub use middleware::{EnrichMiddleware, EventMiddleware, FilterMiddleware};
pub use serializer::EventSerializer;
pub use store::{EventStore, ReplayOptions, StoreStats};
pub use subscription::{handler_fn, EventHandler, SubscribeOptions, SubscriptionStats};
