//! Session lifecycle and pipeline orchestration
//!
//! The integrator owns all live sessions. `execute_integration` runs
//! Fusing -> Analyzing -> Generating in one pass and transitions the session
//! to Completed; in real-time mode every accepted result refreshes the
//! outputs immediately. The process deadline is a warning, never an abort.

use crate::anomaly::{self, Anomaly};
use crate::conflict::{self, ResultConflict};
use crate::error::{IntegratorError, IntegratorResult};
use crate::fusion::{self, FusedGroup, FusionStrategy};
use crate::insight::{self, Insight};
use crate::session::{IntegrationSession, ResultMetadata, SessionStatus};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::config::IntegratorConfig;
use tandem_core::SessionId;
use tandem_events::{EventBus, PublishOptions};

/// Everything a completed pipeline produced
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntegrationOutput {
    pub session_id: SessionId,
    pub fused: Vec<FusedGroup>,
    pub conflicts: Vec<ResultConflict>,
    pub anomalies: Vec<Anomaly>,
    pub insights: Vec<Insight>,
    pub duration_ms: u64,
    pub deadline_breached: bool,
}

struct SessionCell {
    session: Mutex<IntegrationSession>,
    output: Mutex<Option<IntegrationOutput>>,
}

/// Owner of integration sessions and the fusion pipeline
pub struct ResultIntegrator {
    config: IntegratorConfig,
    bus: Option<EventBus>,
    sessions: DashMap<SessionId, Arc<SessionCell>>,
}

impl ResultIntegrator {
    pub fn new(config: IntegratorConfig, bus: Option<EventBus>) -> Self {
        Self {
            config,
            bus,
            sessions: DashMap::new(),
        }
    }

    /// Open a session in the Collecting state
    pub async fn create_session(&self) -> SessionId {
        let deadline = Utc::now() + Duration::milliseconds(self.config.process_timeout_ms as i64);
        let session = IntegrationSession::new(deadline);
        let id = session.id.clone();
        self.sessions.insert(
            id.clone(),
            Arc::new(SessionCell {
                session: Mutex::new(session),
                output: Mutex::new(None),
            }),
        );
        self.publish(
            "integration.session.created",
            serde_json::json!({"session": id.as_str()}),
        )
        .await;
        tracing::debug!(session = %id, "integration session created");
        id
    }

    fn cell(&self, id: &SessionId) -> IntegratorResult<Arc<SessionCell>> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| IntegratorError::SessionNotFound(id.clone()))
    }

    /// Append a result; real-time mode refreshes outputs as results arrive
    pub async fn add_result(
        &self,
        id: &SessionId,
        data: Value,
        metadata: ResultMetadata,
    ) -> IntegratorResult<String> {
        let cell = self.cell(id)?;
        let result_id = {
            let mut session = cell.session.lock();
            let status = session.status;
            session
                .add_result(data, metadata)
                .ok_or(IntegratorError::InvalidStatus {
                    id: id.clone(),
                    expected: SessionStatus::Collecting,
                    actual: status,
                })?
        };

        if self.config.realtime {
            let output = self.run_pipeline(&cell, id, false)?;
            *cell.output.lock() = Some(output);
            cell.session.lock().pending.clear();
        }
        Ok(result_id)
    }

    /// Run the full pipeline once and transition the session to Completed
    pub async fn execute_integration(
        &self,
        id: &SessionId,
    ) -> IntegratorResult<IntegrationOutput> {
        let cell = self.cell(id)?;

        {
            let mut session = cell.session.lock();
            if session.status.is_terminal() {
                return Err(IntegratorError::InvalidStatus {
                    id: id.clone(),
                    expected: SessionStatus::Collecting,
                    actual: session.status,
                });
            }
            if session.results.is_empty() {
                session.advance(SessionStatus::Failed);
                drop(session);
                self.publish(
                    "integration.failed",
                    serde_json::json!({"session": id.as_str(), "reason": "no results"}),
                )
                .await;
                return Err(IntegratorError::NoResults(id.clone()));
            }
        }

        let output = match self.run_pipeline(&cell, id, true) {
            Ok(output) => output,
            Err(e) => {
                cell.session.lock().advance(SessionStatus::Failed);
                self.publish(
                    "integration.failed",
                    serde_json::json!({"session": id.as_str(), "reason": e.to_string()}),
                )
                .await;
                return Err(e);
            }
        };

        {
            let mut session = cell.session.lock();
            session.pending.clear();
            session.advance(SessionStatus::Completed);
        }
        *cell.output.lock() = Some(output.clone());
        self.publish(
            "integration.completed",
            serde_json::json!({
                "session": id.as_str(),
                "groups": output.fused.len(),
                "conflicts": output.conflicts.len(),
                "anomalies": output.anomalies.len(),
                "deadline_breached": output.deadline_breached,
            }),
        )
        .await;
        Ok(output)
    }

    /// Fuse -> analyze -> generate; advances the status when `advance` is set
    fn run_pipeline(
        &self,
        cell: &SessionCell,
        id: &SessionId,
        advance: bool,
    ) -> IntegratorResult<IntegrationOutput> {
        let started = Instant::now();
        let strategy = FusionStrategy::from_str(&self.config.fusion_strategy)
            .unwrap_or(FusionStrategy::Weighted);

        let mut session = cell.session.lock();
        if advance {
            session.advance(SessionStatus::Fusing);
        }
        let items = session.items();
        let fused = fusion::fuse(&items, strategy, self.config.similarity_threshold)?;

        if advance {
            // items borrows the session; re-borrow after the state change
            drop(items);
            session.advance(SessionStatus::Analyzing);
        }
        let items = session.items();
        let conflicts = conflict::detect(&items);
        let anomalies = anomaly::detect(
            &items,
            self.config.sigma_threshold,
            self.config.similarity_threshold,
        );

        if advance {
            drop(items);
            session.advance(SessionStatus::Generating);
        }
        let items = session.items();
        let insights = insight::generate(&items, &fused, &conflicts, &anomalies);

        let duration_ms = started.elapsed().as_millis() as u64;
        let deadline_breached = duration_ms > self.config.process_timeout_ms;
        if deadline_breached {
            tracing::warn!(
                session = %id,
                duration_ms,
                timeout_ms = self.config.process_timeout_ms,
                "integration deadline breached"
            );
        }

        Ok(IntegrationOutput {
            session_id: id.clone(),
            fused,
            conflicts,
            anomalies,
            insights,
            duration_ms,
            deadline_breached,
        })
    }

    /// Current status of a session
    pub fn session_status(&self, id: &SessionId) -> IntegratorResult<SessionStatus> {
        Ok(self.cell(id)?.session.lock().status)
    }

    /// Latest output of a session, if any pipeline run completed
    pub fn session_output(&self, id: &SessionId) -> IntegratorResult<Option<IntegrationOutput>> {
        Ok(self.cell(id)?.output.lock().clone())
    }

    /// All session ids with their statuses
    pub fn sessions(&self) -> Vec<(SessionId, SessionStatus)> {
        let mut sessions: Vec<(SessionId, SessionStatus)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().session.lock().status))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    /// Drop terminal sessions; returns how many were removed
    pub fn prune_terminal(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, cell| !cell.session.lock().status.is_terminal());
        before - self.sessions.len()
    }

    async fn publish(&self, event_type: &str, data: Value) {
        if let Some(bus) = &self.bus {
            let options = PublishOptions {
                source: "integrator".to_string(),
                ..Default::default()
            };
            if let Err(e) = bus.publish(event_type, data, options).await {
                tracing::debug!(event_type, error = %e, "integrator publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(source: &str, confidence: f64) -> ResultMetadata {
        ResultMetadata {
            source: source.to_string(),
            confidence,
            error_count: 0,
        }
    }

    fn integrator() -> ResultIntegrator {
        ResultIntegrator::new(IntegratorConfig::default(), None)
    }

    #[tokio::test]
    async fn test_weighted_pipeline_end_to_end() {
        // Three agents score the same artifact; weighted fusion combines
        // them and the statistical detector finds no outlier
        let integrator = integrator();
        let session = integrator.create_session().await;

        integrator
            .add_result(&session, json!({"score": 80.0}), meta("A", 0.9))
            .await
            .unwrap();
        integrator
            .add_result(&session, json!({"score": 70.0}), meta("B", 0.8))
            .await
            .unwrap();
        integrator
            .add_result(&session, json!({"score": 60.0}), meta("C", 0.7))
            .await
            .unwrap();

        let output = integrator.execute_integration(&session).await.unwrap();
        assert_eq!(output.fused.len(), 1);
        let score = output.fused[0].value["score"].as_f64().unwrap();
        assert!((score - 70.8333).abs() < 0.01, "score {score}");
        assert!(output
            .anomalies
            .iter()
            .all(|a| a.kind != crate::anomaly::AnomalyKind::Statistical));
        assert_eq!(
            integrator.session_status(&session).unwrap(),
            SessionStatus::Completed
        );
        assert!(!output.insights.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_further_work() {
        let integrator = integrator();
        let session = integrator.create_session().await;
        integrator
            .add_result(&session, json!({"x": 1.0}), meta("A", 0.9))
            .await
            .unwrap();
        integrator.execute_integration(&session).await.unwrap();

        assert!(matches!(
            integrator
                .add_result(&session, json!({"x": 2.0}), meta("A", 0.9))
                .await,
            Err(IntegratorError::InvalidStatus { .. })
        ));
        assert!(matches!(
            integrator.execute_integration(&session).await,
            Err(IntegratorError::InvalidStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_session_fails() {
        let integrator = integrator();
        let session = integrator.create_session().await;
        let err = integrator.execute_integration(&session).await.unwrap_err();
        assert!(matches!(err, IntegratorError::NoResults(_)));
        assert_eq!(
            integrator.session_status(&session).unwrap(),
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let integrator = integrator();
        let ghost = SessionId::new();
        assert!(matches!(
            integrator.execute_integration(&ghost).await,
            Err(IntegratorError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_realtime_mode_processes_on_arrival() {
        let config = IntegratorConfig {
            realtime: true,
            ..IntegratorConfig::default()
        };
        let integrator = ResultIntegrator::new(config, None);
        let session = integrator.create_session().await;

        integrator
            .add_result(&session, json!({"score": 10.0}), meta("A", 0.9))
            .await
            .unwrap();
        let output = integrator.session_output(&session).unwrap();
        assert!(output.is_some());
        // Still collecting: execute() remains the terminal transition
        assert_eq!(
            integrator.session_status(&session).unwrap(),
            SessionStatus::Collecting
        );
    }

    #[tokio::test]
    async fn test_prune_terminal_sessions() {
        let integrator = integrator();
        let done = integrator.create_session().await;
        integrator
            .add_result(&done, json!({"x": 1.0}), meta("A", 0.9))
            .await
            .unwrap();
        integrator.execute_integration(&done).await.unwrap();
        let live = integrator.create_session().await;

        assert_eq!(integrator.prune_terminal(), 1);
        assert!(integrator.session_status(&done).is_err());
        assert!(integrator.session_status(&live).is_ok());
    }
}
