//! Default plan-step executor
//!
//! The real script/agent invocation bridge lives outside the core; this
//! executor is the seam it plugs into. The local implementation synthesizes
//! a structured acknowledgement per step so the routing, resilience, and
//! integration paths are fully exercised end to end.

use async_trait::async_trait;
use serde_json::Value;
use tandem_router::{PlanStep, RouterResult, RoutingDecision, StepExecutor};

/// In-process executor used when no external bridge is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

#[async_trait]
impl StepExecutor for LocalExecutor {
    async fn run_step(
        &self,
        step: &PlanStep,
        decision: &RoutingDecision,
    ) -> RouterResult<Value> {
        tracing::debug!(step = step.name, endpoint = step.endpoint, "running plan step");
        Ok(serde_json::json!({
            "step": step.name,
            "endpoint": step.endpoint,
            "command": decision.command,
            "strategy": decision.selected,
            "status": "ok",
        }))
    }
}
