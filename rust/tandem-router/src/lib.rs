//! Smart routing for the tandem platform
//!
//! Provides:
//! - Command parsing and feature extraction ([`context`])
//! - Built-in routing strategies with applicability predicates ([`strategy`])
//! - Multi-dimensional strategy scoring with a cached decision engine
//!   ([`engine`])
//! - Feedback-driven learning with a decision-tree classifier ([`learning`])
//! - The end-to-end [`SmartRouter`] pipeline

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod context;
pub mod engine;
pub mod error;
pub mod learning;
pub mod router;
pub mod strategy;

pub use context::{CommandAnalysis, CommandType, ContextAnalyzer, Intent, Requirements};
pub use engine::{DecisionEngine, Dimension, StrategyEvaluation, WeightVector};
pub use error::{RouterError, RouterResult};
pub use learning::{Feedback, LearningModule, LearningSample, Prediction};
pub use router::{
    Alternative, ExecutionReport, RoutingDecision, SmartRouter, StepExecutor, StepResult,
};
pub use strategy::{builtin_strategies, PlanStep, RoutingStrategy};
