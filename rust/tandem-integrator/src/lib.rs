//! Result integration for the tandem platform
//!
//! Fans in heterogeneous multi-agent results through a session pipeline:
//! Collecting -> Fusing -> Analyzing -> Generating -> Completed. Fusion
//! reconciles values per semantic group, conflict detection and anomaly
//! detection qualify the data, and the insight generator summarizes the run.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod anomaly;
pub mod conflict;
pub mod error;
pub mod fusion;
pub mod insight;
pub mod integrator;
pub mod session;

pub use anomaly::{Anomaly, AnomalyKind};
pub use conflict::{ConflictCategory, ResultConflict};
pub use error::{IntegratorError, IntegratorResult};
pub use fusion::{FusedGroup, FusionStrategy};
pub use insight::{Insight, InsightKind};
pub use integrator::{IntegrationOutput, ResultIntegrator};
pub use session::{IntegrationSession, ResultItem, ResultMetadata, SessionStatus};
