//! Circuit breakers for downstream call isolation
//!
//! Each logical endpoint gets a named breaker with a sliding statistics
//! window, a trip strategy deciding when to open, and a recovery strategy
//! deciding when to probe again. A registry owns all instances and caps
//! their number.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod breaker;
pub mod error;
pub mod registry;
pub mod window;

pub use breaker::{
    CircuitBreaker, CircuitConfig, CircuitState, CircuitStats, GuardError, RecoveryStrategy,
    StateTransition, TripStrategy,
};
pub use error::{CircuitError, CircuitResult};
pub use registry::CircuitBreakerRegistry;
pub use window::WindowStats;
