//! End-to-end routing pipeline
//!
//! route(): analyze -> candidate generation -> parallel evaluation -> rank ->
//! confidence -> publish. execute(): drive the selected plan through named
//! circuit breakers, then feed the outcome back into the learning module.
//! Decisions keep a bounded history; each accepts feedback at most once.

use crate::context::{CommandAnalysis, ContextAnalyzer};
use crate::engine::{DecisionEngine, StrategyEvaluation};
use crate::error::{RouterError, RouterResult};
use crate::learning::{Feedback, LearningModule, LearningSample};
use crate::strategy::{PlanStep, RoutingStrategy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::{Command, DecisionId};
use tandem_events::{EventBus, PublishOptions};
use tandem_resilience::{CircuitBreakerRegistry, GuardError};

/// A runner for one plan step; the platform supplies the implementation
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run_step(&self, step: &PlanStep, decision: &RoutingDecision)
        -> RouterResult<Value>;
}

/// A non-selected candidate, for operator visibility
#[derive(Debug, Clone, serde::Serialize)]
pub struct Alternative {
    pub strategy: String,
    pub score: f64,
    pub confidence: f64,
}

/// Output of the routing pipeline
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingDecision {
    pub decision_id: DecisionId,
    pub command: String,
    pub analysis: CommandAnalysis,
    pub selected: String,
    /// Confidence in [0, 1] after strategy-match bonuses
    pub confidence: f64,
    /// Up to three runners-up
    pub alternatives: Vec<Alternative>,
    pub explanation: String,
    pub plan: Vec<PlanStep>,
    pub predicted_duration_ms: u64,
    pub predicted_success_rate: f64,
    #[serde(skip)]
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of one executed plan step
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepResult {
    pub step: String,
    pub endpoint: String,
    pub output: Value,
    pub duration_ms: u64,
}

/// Result of executing a decision's plan
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionReport {
    pub decision_id: DecisionId,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Content- and context-aware command router
pub struct SmartRouter {
    analyzer: ContextAnalyzer,
    engine: DecisionEngine,
    learning: LearningModule,
    strategies: RwLock<Vec<RoutingStrategy>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    bus: Option<EventBus>,
    history: Mutex<VecDeque<RoutingDecision>>,
    history_limit: usize,
    feedback_given: DashMap<String, ()>,
    decision_budget_ms: u64,
}

impl SmartRouter {
    pub fn new(
        config: &tandem_core::config::RouterConfig,
        strategies: Vec<RoutingStrategy>,
        learning: LearningModule,
        breakers: Option<Arc<CircuitBreakerRegistry>>,
        bus: Option<EventBus>,
    ) -> Self {
        Self {
            analyzer: ContextAnalyzer::new(),
            engine: DecisionEngine::new(config.cache_size),
            learning,
            strategies: RwLock::new(strategies),
            breakers,
            bus,
            history: Mutex::new(VecDeque::with_capacity(config.history_limit)),
            history_limit: config.history_limit.max(1),
            feedback_given: DashMap::new(),
            decision_budget_ms: config.decision_budget_ms,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn learning(&self) -> &LearningModule {
        &self.learning
    }

    /// Register an additional strategy
    pub fn add_strategy(&self, strategy: RoutingStrategy) {
        self.strategies.write().push(strategy);
    }

    /// Produce a routing decision for a raw command line
    pub async fn route(&self, raw: &str, user: Option<&str>) -> RouterResult<RoutingDecision> {
        let started = Instant::now();
        let command = Command::parse(raw)?;
        let analysis = self.analyzer.analyze(&command);

        // Candidate generation by applicability predicates
        let candidates: Vec<RoutingStrategy> = self
            .strategies
            .read()
            .iter()
            .filter(|s| s.applicable(&analysis))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(RouterError::NoCandidates {
                command: raw.to_string(),
            });
        }

        let evaluations = self.engine.evaluate_all(&candidates, &analysis).await;
        for evaluation in &evaluations {
            if !evaluation.failed_dimensions.is_empty() {
                self.publish(
                    "router.performance.warning",
                    serde_json::json!({
                        "strategy": evaluation.strategy,
                        "failed_dimensions": evaluation.failed_dimensions.len(),
                    }),
                )
                .await;
            }
        }

        // Rank by weighted score, tie-break on raw priority
        let mut ranked: Vec<(&RoutingStrategy, &StrategyEvaluation)> =
            candidates.iter().zip(evaluations.iter()).collect();
        ranked.sort_by(|a, b| {
            b.1.weighted_score
                .total_cmp(&a.1.weighted_score)
                .then(b.0.priority.cmp(&a.0.priority))
        });

        let (winner, winning_eval) = ranked[0];
        let confidence = self.confidence(winner, winning_eval, &analysis, user);
        let alternatives: Vec<Alternative> = ranked
            .iter()
            .skip(1)
            .take(3)
            .map(|(strategy, evaluation)| Alternative {
                strategy: strategy.name.clone(),
                score: evaluation.weighted_score,
                confidence: evaluation.confidence,
            })
            .collect();

        let (predicted_duration_ms, predicted_success_rate) = self
            .learning
            .strategy_stats(&winner.name)
            .unwrap_or((1000, 0.8));

        let decision = RoutingDecision {
            decision_id: DecisionId::new(),
            command: raw.to_string(),
            analysis,
            selected: winner.name.clone(),
            confidence,
            alternatives,
            explanation: explain(winner, winning_eval),
            plan: winner.plan.clone(),
            predicted_duration_ms,
            predicted_success_rate,
            user: user.map(str::to_string),
            timestamp: Utc::now(),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.decision_budget_ms {
            tracing::warn!(elapsed_ms, budget_ms = self.decision_budget_ms, "decision budget breached");
            self.publish(
                "router.performance.warning",
                serde_json::json!({
                    "decision": decision.decision_id.as_str(),
                    "elapsed_ms": elapsed_ms,
                    "budget_ms": self.decision_budget_ms,
                }),
            )
            .await;
        }

        self.publish(
            "router.decision",
            serde_json::json!({
                "decision": decision.decision_id.as_str(),
                "command": decision.command,
                "selected": decision.selected,
                "confidence": decision.confidence,
            }),
        )
        .await;

        // Completed decisions are copied into a bounded history buffer
        {
            let mut history = self.history.lock();
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(decision.clone());
        }
        Ok(decision)
    }

    /// Confidence: scaled base plus strategy-match bonuses, capped to [0, 1]
    fn confidence(
        &self,
        strategy: &RoutingStrategy,
        evaluation: &StrategyEvaluation,
        analysis: &CommandAnalysis,
        user: Option<&str>,
    ) -> f64 {
        let mut confidence = evaluation.confidence;
        if strategy.preferred_types.contains(&analysis.command_type) {
            confidence += 0.3;
        }
        let half_width =
            ((strategy.complexity_range.1 - strategy.complexity_range.0) / 2.0).max(0.05);
        let band_fit = (1.0
            - (analysis.complexity - strategy.complexity_center()).abs() / half_width)
            .clamp(0.0, 1.0);
        confidence += 0.2 * band_fit;
        if strategy.preferred_intents.contains(&analysis.intent) {
            confidence += 0.2;
        }

        // The learner's opinion nudges, never overrides
        if let Some(prediction) = self
            .learning
            .predict(&crate::learning::FeatureVector::from_analysis(analysis), user)
        {
            if prediction.strategy == strategy.name {
                confidence += 0.05 * prediction.confidence;
            }
        }
        confidence.clamp(0.0, 1.0)
    }

    /// Execute the decision's plan through circuit-guarded calls
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        executor: &dyn StepExecutor,
    ) -> RouterResult<ExecutionReport> {
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut failure: Option<RouterError> = None;

        for step in &decision.plan {
            let step_started = Instant::now();
            let outcome = match &self.breakers {
                Some(registry) => {
                    let breaker = registry
                        .get_or_create(&step.endpoint)
                        .map_err(|e| RouterError::Internal(e.to_string()))?;
                    match breaker.execute(|| executor.run_step(step, decision)).await {
                        Ok(output) => Ok(output),
                        Err(GuardError::Refused { .. }) => {
                            self.finish_execution(decision, false, started).await;
                            return Err(RouterError::EndpointRefused {
                                endpoint: step.endpoint.clone(),
                            });
                        }
                        Err(GuardError::Inner(e)) => Err(e),
                    }
                }
                None => executor.run_step(step, decision).await,
            };

            match outcome {
                Ok(output) => steps.push(StepResult {
                    step: step.name.clone(),
                    endpoint: step.endpoint.clone(),
                    output,
                    duration_ms: step_started.elapsed().as_millis() as u64,
                }),
                Err(e) => {
                    failure = Some(RouterError::StepFailed {
                        step: step.name.clone(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        let success = failure.is_none();
        self.finish_execution(decision, success, started).await;
        Ok(ExecutionReport {
            decision_id: decision.decision_id.clone(),
            success,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
            error: failure.map(|e| e.to_string()),
        })
    }

    async fn finish_execution(&self, decision: &RoutingDecision, success: bool, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let mut sample = LearningSample::new(
            &decision.analysis,
            &decision.selected,
            success,
            duration_ms,
        )
        .with_decision(decision.decision_id.as_str());
        if let Some(user) = &decision.user {
            sample = sample.with_user(user);
        }
        if let Err(e) = self.learning.record_sample(sample).await {
            tracing::warn!(error = %e, "sample recording failed");
        }

        self.publish(
            "router.executed",
            serde_json::json!({
                "decision": decision.decision_id.as_str(),
                "strategy": decision.selected,
                "success": success,
                "duration_ms": duration_ms,
            }),
        )
        .await;
    }

    /// Attach feedback to a decision; allowed at most once per decision
    pub async fn record_feedback(
        &self,
        decision_id: &DecisionId,
        feedback: Feedback,
    ) -> RouterResult<()> {
        let known = self
            .history
            .lock()
            .iter()
            .any(|d| &d.decision_id == decision_id);
        if !known {
            return Err(RouterError::DecisionNotFound(decision_id.clone()));
        }
        if self
            .feedback_given
            .insert(decision_id.as_str().to_string(), ())
            .is_some()
        {
            return Err(RouterError::FeedbackAlreadyRecorded(decision_id.clone()));
        }
        self.learning.feedback(feedback).await
    }

    /// Completed decisions, oldest first
    pub fn history(&self) -> Vec<RoutingDecision> {
        self.history.lock().iter().cloned().collect()
    }

    async fn publish(&self, event_type: &str, data: Value) {
        if let Some(bus) = &self.bus {
            let options = PublishOptions {
                source: "router".to_string(),
                ..Default::default()
            };
            if let Err(e) = bus.publish(event_type, data, options).await {
                tracing::debug!(event_type, error = %e, "router publish failed");
            }
        }
    }
}

/// Human-readable selection rationale listing the top-scoring dimensions
fn explain(strategy: &RoutingStrategy, evaluation: &StrategyEvaluation) -> String {
    let mut dims: Vec<(String, f64)> = evaluation
        .scores
        .iter()
        .map(|(dimension, score)| (format!("{dimension:?}").to_lowercase(), *score))
        .collect();
    dims.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top: Vec<String> = dims
        .iter()
        .take(3)
        .map(|(name, score)| format!("{name} {score:.2}"))
        .collect();
    format!(
        "selected '{}' (weighted {:.2}); strongest dimensions: {}",
        strategy.name,
        evaluation.weighted_score,
        top.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::builtin_strategies;
    use tandem_core::config::RouterConfig;

    struct OkExecutor;

    #[async_trait]
    impl StepExecutor for OkExecutor {
        async fn run_step(
            &self,
            step: &PlanStep,
            _decision: &RoutingDecision,
        ) -> RouterResult<Value> {
            Ok(serde_json::json!({"step": step.name}))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl StepExecutor for FailingExecutor {
        async fn run_step(
            &self,
            step: &PlanStep,
            _decision: &RoutingDecision,
        ) -> RouterResult<Value> {
            Err(RouterError::StepFailed {
                step: step.name.clone(),
                message: "boom".to_string(),
            })
        }
    }

    fn router() -> SmartRouter {
        let config = RouterConfig::default();
        let learning = LearningModule::new(config.clone(), None);
        SmartRouter::new(&config, builtin_strategies(), learning, None, None)
    }

    #[tokio::test]
    async fn test_superclaude_analyze_routes_static_with_high_confidence() {
        let router = router();
        let decision = router.route("/sc:analyze main.ts", None).await.unwrap();

        assert_eq!(decision.selected, "static");
        assert!(decision.confidence >= 0.9, "confidence {}", decision.confidence);
        let alternative_names: Vec<&str> = decision
            .alternatives
            .iter()
            .map(|a| a.strategy.as_str())
            .collect();
        assert!(alternative_names.contains(&"dynamic"));
        assert!(!decision.explanation.is_empty());
    }

    #[tokio::test]
    async fn test_alternatives_are_capped_at_three() {
        let router = router();
        let decision = router.route("/sc:implement feature.ts --deep", None).await.unwrap();
        assert!(decision.alternatives.len() <= 3);
    }

    #[tokio::test]
    async fn test_decision_determinism_within_weight_epoch() {
        let router = router();
        let first = router.route("/sc:analyze main.ts", None).await.unwrap();
        let second = router.route("/sc:analyze main.ts", None).await.unwrap();
        assert_eq!(first.selected, second.selected);

        let (hits, _) = router.engine().cache_stats();
        assert!(hits > 0, "second route should hit the evaluation cache");
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_ordered() {
        let config = RouterConfig {
            history_limit: 3,
            ..RouterConfig::default()
        };
        let learning = LearningModule::new(config.clone(), None);
        let router = SmartRouter::new(&config, builtin_strategies(), learning, None, None);

        for n in 0..5 {
            router
                .route(&format!("pm:status {n}"), None)
                .await
                .unwrap();
        }
        let history = router.history();
        assert_eq!(history.len(), 3);
        assert!(history[0].command.ends_with('2'));
        assert!(history[2].command.ends_with('4'));
    }

    #[tokio::test]
    async fn test_execute_runs_every_plan_step() {
        let router = router();
        let decision = router.route("/sc:analyze main.ts", None).await.unwrap();
        let report = router.execute(&decision, &OkExecutor).await.unwrap();
        assert!(report.success);
        assert_eq!(report.steps.len(), decision.plan.len());
        // The outcome became a learning sample
        assert_eq!(router.learning().sample_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_reports_without_panicking_the_pipeline() {
        let router = router();
        let decision = router.route("/sc:analyze main.ts", None).await.unwrap();
        let report = router.execute(&decision, &FailingExecutor).await.unwrap();
        assert!(!report.success);
        assert!(report.error.is_some());
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_at_most_once() {
        let router = router();
        let decision = router.route("pm:status", None).await.unwrap();

        let feedback = || Feedback::UserRating {
            decision: decision.decision_id.as_str().to_string(),
            rating: 4,
        };
        router
            .record_feedback(&decision.decision_id, feedback())
            .await
            .unwrap();
        let err = router
            .record_feedback(&decision.decision_id, feedback())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::FeedbackAlreadyRecorded(_)));
    }

    #[tokio::test]
    async fn test_feedback_for_unknown_decision_fails() {
        let router = router();
        router.route("pm:status", None).await.unwrap();
        let unknown = DecisionId::new();
        let err = router
            .record_feedback(
                &unknown,
                Feedback::UserRating {
                    decision: unknown.as_str().to_string(),
                    rating: 3,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::DecisionNotFound(_)));
    }
}
