//! Circuit breaker state machine
//!
//! Transitions:
//! - Closed, failure -> trip predicate true -> Open
//! - Open, recovery condition met -> HalfOpen (first permitted call probes)
//! - HalfOpen, `half_open_requests` successes -> Closed
//! - HalfOpen, any failure -> Open
//!
//! Manual `trip`/`reset`/`half_open` force transitions with a reason tag.
//! Counters use atomics; the per-instance lock guards transitions only.

use crate::error::CircuitError;
use crate::window::{SlidingWindow, WindowStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tandem_core::config::ResilienceConfig;
use thiserror::Error;

/// Ring-buffer cap on recorded transitions per circuit
const HISTORY_LIMIT: usize = 100;
/// Exponential recovery backoff cap
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; calls are refused
    Open,
    /// Probing recovery
    HalfOpen,
}

/// When to open a closed circuit
#[derive(Debug, Clone)]
pub enum TripStrategy {
    /// Open when failures/total reaches the threshold with enough traffic
    FailureRate {
        threshold: f64,
        minimum_requests: u64,
    },
    /// Open when the windowed average response time reaches the threshold
    ResponseTime { threshold: Duration },
    /// Open after N consecutive failures
    ConsecutiveFailures { threshold: u32 },
    /// Open when concurrent calls reach the limit
    Concurrency { max_concurrent: u64 },
}

/// When an open circuit may probe again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Probe after a fixed timeout
    TimeBased,
    /// Wait doubles with each open transition, capped at 2^10
    Exponential,
    /// Wait scales by (1 + failure rate)
    Adaptive,
    /// Probe immediately; only successes close the circuit
    SuccessBased,
}

/// Per-instance configuration
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub trip: TripStrategy,
    pub recovery: RecoveryStrategy,
    pub recovery_timeout: Duration,
    /// Successes required in HalfOpen to close
    pub half_open_requests: u32,
    pub window_duration: Duration,
    pub max_buckets: usize,
}

impl CircuitConfig {
    /// Instance defaults derived from the platform resilience section
    pub fn from_defaults(defaults: &ResilienceConfig) -> Self {
        Self {
            trip: TripStrategy::FailureRate {
                threshold: defaults.failure_threshold,
                minimum_requests: defaults.minimum_requests,
            },
            recovery: RecoveryStrategy::TimeBased,
            recovery_timeout: Duration::from_millis(defaults.recovery_timeout_ms),
            half_open_requests: defaults.half_open_requests,
            window_duration: Duration::from_millis(defaults.window_duration_ms),
            max_buckets: defaults.max_buckets,
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, serde::Serialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Status snapshot for observability
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub window: WindowStats,
    pub active_requests: u64,
    pub consecutive_failures: u32,
    pub open_count: u32,
    pub half_open_successes: u32,
}

/// Refusal or passthrough of the guarded operation's own error
#[derive(Error, Debug)]
pub enum GuardError<E: std::error::Error> {
    /// The circuit refused the call
    #[error("circuit '{name}' refused the call ({state:?})")]
    Refused { name: String, state: CircuitState },
    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

impl<E: std::error::Error> GuardError<E> {
    /// The refusal as a [`CircuitError`], if this is one
    pub fn as_refusal(&self) -> Option<CircuitError> {
        match self {
            GuardError::Refused { name, state } => Some(CircuitError::Open {
                name: name.clone(),
                state: *state,
            }),
            GuardError::Inner(_) => None,
        }
    }
}

#[derive(Debug)]
struct StateCell {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Open transitions since the last reset, for exponential backoff
    open_count: u32,
    half_open_successes: u32,
}

/// A named guard around a potentially failing downstream call
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    cell: Mutex<StateCell>,
    window: SlidingWindow,
    active_requests: AtomicU64,
    consecutive_failures: AtomicU32,
    history: Mutex<VecDeque<StateTransition>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitConfig) -> Self {
        let window = SlidingWindow::new(config.window_duration, config.max_buckets);
        Self {
            name: name.to_string(),
            config,
            cell: Mutex::new(StateCell {
                state: CircuitState::Closed,
                opened_at: None,
                open_count: 0,
                half_open_successes: 0,
            }),
            window,
            active_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the operation unless the circuit refuses it
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.check_admission()?;

        self.active_requests.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let outcome = operation().await;
        let duration = started.elapsed();
        self.active_requests.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(value) => {
                self.on_success(duration);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(duration);
                Err(GuardError::Inner(error))
            }
        }
    }

    fn check_admission<E: std::error::Error>(&self) -> Result<(), GuardError<E>> {
        let mut cell = self.cell.lock();
        match cell.state {
            CircuitState::Closed => {
                // The concurrency strategy refuses at the door
                if let TripStrategy::Concurrency { max_concurrent } = self.config.trip {
                    if self.active_requests.load(Ordering::SeqCst) >= max_concurrent {
                        self.transition(&mut cell, CircuitState::Open, "concurrency limit");
                        return Err(GuardError::Refused {
                            name: self.name.clone(),
                            state: CircuitState::Open,
                        });
                    }
                }
                Ok(())
            }
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if self.recovery_due(&cell) {
                    self.transition(&mut cell, CircuitState::HalfOpen, "recovery window elapsed");
                    Ok(())
                } else {
                    Err(GuardError::Refused {
                        name: self.name.clone(),
                        state: CircuitState::Open,
                    })
                }
            }
        }
    }

    fn recovery_due(&self, cell: &StateCell) -> bool {
        let Some(opened_at) = cell.opened_at else {
            return true;
        };
        let elapsed = opened_at.elapsed();
        match self.config.recovery {
            RecoveryStrategy::TimeBased => elapsed >= self.config.recovery_timeout,
            RecoveryStrategy::Exponential => {
                let exponent = cell.open_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
                let wait = self.config.recovery_timeout * 2u32.pow(exponent);
                elapsed >= wait
            }
            RecoveryStrategy::Adaptive => {
                let rate = self.window.snapshot().failure_rate();
                let wait = self.config.recovery_timeout.mul_f64(1.0 + rate);
                elapsed >= wait
            }
            RecoveryStrategy::SuccessBased => true,
        }
    }

    fn on_success(&self, duration: Duration) {
        self.window.record(true, duration);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let mut cell = self.cell.lock();
        if cell.state == CircuitState::HalfOpen {
            cell.half_open_successes += 1;
            if cell.half_open_successes >= self.config.half_open_requests {
                self.transition(&mut cell, CircuitState::Closed, "half-open successes");
            }
        }
    }

    fn on_failure(&self, duration: Duration) {
        self.window.record(false, duration);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;

        let mut cell = self.cell.lock();
        match cell.state {
            CircuitState::HalfOpen => {
                self.transition(&mut cell, CircuitState::Open, "half-open failure");
            }
            CircuitState::Closed => {
                if self.should_trip(consecutive) {
                    self.transition(&mut cell, CircuitState::Open, "trip threshold");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn should_trip(&self, consecutive: u32) -> bool {
        match &self.config.trip {
            TripStrategy::FailureRate {
                threshold,
                minimum_requests,
            } => {
                let stats = self.window.snapshot();
                stats.total >= *minimum_requests && stats.failure_rate() >= *threshold
            }
            TripStrategy::ResponseTime { threshold } => {
                let stats = self.window.snapshot();
                stats.total > 0 && stats.avg_response_ms >= threshold.as_millis() as f64
            }
            TripStrategy::ConsecutiveFailures { threshold } => consecutive >= *threshold,
            TripStrategy::Concurrency { max_concurrent } => {
                self.active_requests.load(Ordering::SeqCst) >= *max_concurrent
            }
        }
    }

    fn transition(&self, cell: &mut StateCell, to: CircuitState, reason: &str) {
        let from = cell.state;
        if from == to {
            return;
        }
        cell.state = to;
        match to {
            CircuitState::Open => {
                cell.opened_at = Some(Instant::now());
                cell.open_count += 1;
            }
            CircuitState::HalfOpen => {
                cell.half_open_successes = 0;
            }
            CircuitState::Closed => {
                cell.opened_at = None;
                cell.open_count = 0;
                cell.half_open_successes = 0;
            }
        }
        tracing::info!(circuit = %self.name, ?from, ?to, reason, "circuit transition");

        let mut history = self.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(StateTransition {
            from,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
    }

    /// Force the circuit open
    pub fn trip(&self, reason: &str) {
        let mut cell = self.cell.lock();
        self.transition(&mut cell, CircuitState::Open, reason);
    }

    /// Force the circuit closed and clear accumulated failure state
    pub fn reset(&self, reason: &str) {
        let mut cell = self.cell.lock();
        self.transition(&mut cell, CircuitState::Closed, reason);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.window.reset();
    }

    /// Force the circuit into the probing state
    pub fn half_open(&self, reason: &str) {
        let mut cell = self.cell.lock();
        self.transition(&mut cell, CircuitState::HalfOpen, reason);
    }

    pub fn state(&self) -> CircuitState {
        self.cell.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        let cell = self.cell.lock();
        CircuitStats {
            name: self.name.clone(),
            state: cell.state,
            window: self.window.snapshot(),
            active_requests: self.active_requests.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            open_count: cell.open_count,
            half_open_successes: cell.half_open_successes,
        }
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("downstream failed")]
    struct DownstreamError;

    fn consecutive_config(threshold: u32) -> CircuitConfig {
        CircuitConfig {
            trip: TripStrategy::ConsecutiveFailures { threshold },
            recovery: RecoveryStrategy::TimeBased,
            recovery_timeout: Duration::from_millis(50),
            half_open_requests: 3,
            window_duration: Duration::from_secs(60),
            max_buckets: 10,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), GuardError<DownstreamError>> {
        breaker.execute(|| async { Err::<(), _>(DownstreamError) }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), GuardError<DownstreamError>> {
        breaker.execute(|| async { Ok::<_, DownstreamError>(()) }).await.map(|_| ())
    }

    #[tokio::test]
    async fn test_consecutive_failures_trip_to_open() {
        let breaker = CircuitBreaker::new("ep", consecutive_config(10));

        // 10 failures trip; the 11th is refused
        for _ in 0..10 {
            assert!(matches!(fail(&breaker).await, Err(GuardError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            fail(&breaker).await,
            Err(GuardError::Refused { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_refuses_until_recovery_then_half_open() {
        let breaker = CircuitBreaker::new("ep", consecutive_config(1));
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the window elapses: refused
        assert!(matches!(
            succeed(&breaker).await,
            Err(GuardError::Refused { .. })
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        // First permitted call probes in HalfOpen
        succeed(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("ep", consecutive_config(1));
        fail(&breaker).await.ok();
        tokio::time::sleep(Duration::from_millis(60)).await;
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_successes_close() {
        let breaker = CircuitBreaker::new("ep", consecutive_config(1));
        fail(&breaker).await.ok();
        tokio::time::sleep(Duration::from_millis(60)).await;
        for _ in 0..3 {
            succeed(&breaker).await.ok();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_rate_needs_minimum_requests() {
        let config = CircuitConfig {
            trip: TripStrategy::FailureRate {
                threshold: 0.5,
                minimum_requests: 10,
            },
            ..consecutive_config(0)
        };
        let breaker = CircuitBreaker::new("ep", config);

        // 5 failures out of 5: rate is 1.0 but traffic is below the floor
        for _ in 0..5 {
            fail(&breaker).await.ok();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        // 4 successes + 6 failures out of 10: 0.6 >= 0.5 trips
        for _ in 0..4 {
            succeed(&breaker).await.ok();
        }
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_manual_transitions_record_history() {
        let breaker = CircuitBreaker::new("ep", consecutive_config(5));
        breaker.trip("operator");
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.half_open("operator");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.reset("operator");
        assert_eq!(breaker.state(), CircuitState::Closed);

        let history = breaker.history();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|t| t.reason == "operator"));
    }

    #[tokio::test]
    async fn test_success_based_recovery_probes_immediately() {
        let config = CircuitConfig {
            recovery: RecoveryStrategy::SuccessBased,
            half_open_requests: 2,
            ..consecutive_config(1)
        };
        let breaker = CircuitBreaker::new("ep", config);
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        // No wait needed; successes close after the threshold
        succeed(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_exponential_recovery_doubles_wait() {
        let config = CircuitConfig {
            recovery: RecoveryStrategy::Exponential,
            recovery_timeout: Duration::from_millis(20),
            ..consecutive_config(1)
        };
        let breaker = CircuitBreaker::new("ep", config);

        // First open: base wait
        fail(&breaker).await.ok();
        tokio::time::sleep(Duration::from_millis(25)).await;
        fail(&breaker).await.ok(); // HalfOpen probe fails -> second open
        assert_eq!(breaker.state(), CircuitState::Open);

        // Second open: wait doubled to 40ms; 25ms is not enough
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(matches!(
            succeed(&breaker).await,
            Err(GuardError::Refused { .. })
        ));
        tokio::time::sleep(Duration::from_millis(25)).await;
        succeed(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }
}
