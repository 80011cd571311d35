//! Routing strategies
//!
//! A strategy is a named execution approach with applicability predicates
//! (ecosystem membership, complexity band, requirement checks), a raw
//! priority for tie-breaking, and an execution-plan template of
//! breaker-guarded steps.

use crate::context::{CommandAnalysis, CommandType, Intent};
use serde::{Deserialize, Serialize};

/// One step of a strategy's execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    /// Circuit breaker endpoint guarding this step
    pub endpoint: String,
}

impl PlanStep {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// A named algorithm selectable by the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingStrategy {
    pub name: String,
    /// Raw priority; breaks weighted-score ties
    pub priority: i32,
    /// Ecosystems this strategy accepts; empty means all
    pub command_types: Vec<CommandType>,
    /// Inclusive complexity band
    pub complexity_range: (f64, f64),
    /// When non-empty, at least one extracted action must match
    pub required_actions: Vec<String>,
    /// Ecosystems this strategy is tuned for (confidence bonus)
    pub preferred_types: Vec<CommandType>,
    /// Intents this strategy is tuned for (confidence bonus)
    pub preferred_intents: Vec<Intent>,
    /// Thoroughness of the approach in [0, 1]; drives the accuracy,
    /// reliability, and risk dimensions
    pub base_quality: f64,
    pub plan: Vec<PlanStep>,
}

impl RoutingStrategy {
    /// Whether the strategy accepts this analysis
    pub fn applicable(&self, analysis: &CommandAnalysis) -> bool {
        if !self.command_types.is_empty()
            && !self.command_types.contains(&analysis.command_type)
        {
            return false;
        }
        let (low, high) = self.complexity_range;
        if analysis.complexity < low || analysis.complexity > high {
            return false;
        }
        if !self.required_actions.is_empty()
            && !self
                .required_actions
                .iter()
                .any(|action| analysis.requirements.actions.contains(action))
        {
            return false;
        }
        true
    }

    /// Center of the complexity band, for confidence scoring
    pub fn complexity_center(&self) -> f64 {
        (self.complexity_range.0 + self.complexity_range.1) / 2.0
    }
}

/// The built-in strategy catalog
pub fn builtin_strategies() -> Vec<RoutingStrategy> {
    vec![
        RoutingStrategy {
            name: "static".to_string(),
            priority: 10,
            command_types: Vec::new(),
            complexity_range: (0.0, 0.7),
            required_actions: Vec::new(),
            preferred_types: vec![CommandType::SuperClaude, CommandType::Pm],
            preferred_intents: vec![Intent::Analyze, Intent::Query, Intent::Test],
            base_quality: 0.9,
            plan: vec![
                PlanStep::new("resolve", "catalog"),
                PlanStep::new("execute", "executor.static"),
            ],
        },
        RoutingStrategy {
            name: "dynamic".to_string(),
            priority: 5,
            command_types: Vec::new(),
            complexity_range: (0.2, 1.0),
            required_actions: Vec::new(),
            preferred_types: vec![CommandType::SuperClaude],
            preferred_intents: vec![Intent::Build, Intent::Deploy],
            base_quality: 0.85,
            plan: vec![
                PlanStep::new("plan", "planner"),
                PlanStep::new("execute", "executor.dynamic"),
                PlanStep::new("verify", "verifier"),
            ],
        },
        RoutingStrategy {
            name: "hybrid".to_string(),
            priority: 3,
            command_types: vec![CommandType::Hybrid, CommandType::SuperClaude, CommandType::Pm],
            complexity_range: (0.4, 1.0),
            required_actions: Vec::new(),
            preferred_types: vec![CommandType::Hybrid],
            preferred_intents: vec![Intent::Build, Intent::Manage],
            base_quality: 0.8,
            plan: vec![
                PlanStep::new("split", "planner"),
                PlanStep::new("execute-pm", "executor.pm"),
                PlanStep::new("execute-agent", "executor.dynamic"),
                PlanStep::new("join", "integrator"),
            ],
        },
        RoutingStrategy {
            name: "conservative".to_string(),
            priority: 1,
            command_types: Vec::new(),
            complexity_range: (0.0, 1.0),
            required_actions: Vec::new(),
            preferred_types: Vec::new(),
            preferred_intents: Vec::new(),
            base_quality: 0.4,
            plan: vec![PlanStep::new("execute", "executor.fallback")],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAnalyzer;
    use tandem_core::Command;

    fn analysis(raw: &str) -> CommandAnalysis {
        ContextAnalyzer::new().analyze(&Command::parse(raw).unwrap())
    }

    #[test]
    fn test_static_accepts_low_complexity() {
        let strategies = builtin_strategies();
        let simple = analysis("/sc:analyze main.ts");
        let applicable: Vec<&str> = strategies
            .iter()
            .filter(|s| s.applicable(&simple))
            .map(|s| s.name.as_str())
            .collect();
        assert!(applicable.contains(&"static"));
        assert!(applicable.contains(&"dynamic"));
        assert!(applicable.contains(&"conservative"));
    }

    #[test]
    fn test_conservative_is_always_applicable() {
        let strategies = builtin_strategies();
        let fallback = strategies.iter().find(|s| s.name == "conservative").unwrap();
        for raw in ["pm:status", "/sc:implement big feature", "weird input"] {
            assert!(fallback.applicable(&analysis(raw)), "{raw}");
        }
    }

    #[test]
    fn test_complexity_band_excludes() {
        let strategies = builtin_strategies();
        let hybrid = strategies.iter().find(|s| s.name == "hybrid").unwrap();
        // Low-complexity pm command is outside hybrid's band
        assert!(!hybrid.applicable(&analysis("pm:status")));
    }

    #[test]
    fn test_required_actions_predicate() {
        let mut strategy = builtin_strategies().remove(0);
        strategy.required_actions = vec!["deploy".to_string()];
        assert!(!strategy.applicable(&analysis("pm:status")));
        assert!(strategy.applicable(&analysis("pm:deploy staging")));
    }
}
