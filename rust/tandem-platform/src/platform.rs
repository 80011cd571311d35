//! The composed runtime
//!
//! Construction order: config -> bus (store + middleware) -> state store +
//! synchronizer -> breaker registry -> learning + router -> integrator.
//! `execute_command` drives the control flow from end to end: route through
//! the decision pipeline, execute the plan behind circuit breakers, publish
//! lifecycle events, and fan hybrid results through an integration session.

use crate::error::PlatformResult;
use crate::executor::LocalExecutor;
use parking_lot::RwLock;
use std::sync::Arc;
use tandem_core::config::PlatformConfig;
use tandem_core::CoreResult;
use tandem_events::EventBus;
use tandem_integrator::{IntegrationOutput, ResultIntegrator, ResultMetadata};
use tandem_resilience::CircuitBreakerRegistry;
use tandem_router::{
    builtin_strategies, ExecutionReport, LearningModule, RoutingDecision, SmartRouter,
    StepExecutor,
};
use tandem_state::{ConflictResolver, StateStore, StateSynchronizer};

/// Everything one executed command produced
#[derive(Debug, serde::Serialize)]
pub struct CommandOutcome {
    pub decision: RoutingDecision,
    pub report: ExecutionReport,
    /// Present when the command fanned into an integration session
    pub integration: Option<IntegrationOutput>,
}

/// Builder for [`Platform`]
pub struct PlatformBuilder {
    config: PlatformConfig,
    executor: Arc<dyn StepExecutor>,
}

impl PlatformBuilder {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            config,
            executor: Arc::new(LocalExecutor),
        }
    }

    /// Replace the plan-step executor (the external bridge's seam)
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Wire and initialize every subsystem
    pub async fn build(self) -> PlatformResult<Platform> {
        let config = self.config;
        config.validate()?;

        let bus = EventBus::new(config.events.clone(), &config.data_dir);
        let mut stamp = std::collections::BTreeMap::new();
        stamp.insert(
            "platform_version".to_string(),
            serde_json::Value::String(env!("CARGO_PKG_VERSION").to_string()),
        );
        bus.add_middleware(Arc::new(tandem_events::EnrichMiddleware::new(
            "platform-stamp",
            stamp,
        )));
        bus.init().await?;

        let store = Arc::new(StateStore::new(&config.data_dir, config.state.max_versions));
        store.hydrate().await?;
        let resolver = ConflictResolver::new(config.state.conflict_history_limit)
            .with_history_dir(&config.data_dir);
        resolver.load_history().await?;
        let synchronizer = StateSynchronizer::new(
            config.state.clone(),
            store.clone(),
            resolver,
            Some(bus.clone()),
        );
        synchronizer.start();

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.resilience.clone()));

        let learning = LearningModule::new(
            config.router.clone(),
            Some(config.data_dir.clone()),
        );
        learning.load().await?;
        let router = Arc::new(SmartRouter::new(
            &config.router,
            builtin_strategies(),
            learning,
            Some(breakers.clone()),
            Some(bus.clone()),
        ));

        let integrator = Arc::new(ResultIntegrator::new(
            config.integrator.clone(),
            Some(bus.clone()),
        ));

        tracing::info!(data_dir = %config.data_dir.display(), "platform assembled");
        Ok(Platform {
            config: RwLock::new(config),
            bus,
            store,
            synchronizer,
            breakers,
            router,
            integrator,
            executor: self.executor,
        })
    }
}

/// The assembled runtime owning all long-lived subsystems
pub struct Platform {
    config: RwLock<PlatformConfig>,
    bus: EventBus,
    store: Arc<StateStore>,
    synchronizer: StateSynchronizer,
    breakers: Arc<CircuitBreakerRegistry>,
    router: Arc<SmartRouter>,
    integrator: Arc<ResultIntegrator>,
    executor: Arc<dyn StepExecutor>,
}

impl Platform {
    pub fn builder(config: PlatformConfig) -> PlatformBuilder {
        PlatformBuilder::new(config)
    }

    /// Route and execute one command through the full control flow
    pub async fn execute_command(
        &self,
        raw: &str,
        user: Option<&str>,
    ) -> PlatformResult<CommandOutcome> {
        // Commands with a declared schema are validated before routing
        let parsed = tandem_core::Command::parse(raw)?;
        if let Some(spec) = tandem_core::spec_for(&parsed.name) {
            spec.validate(&parsed)?;
        }

        let decision = self.router.route(raw, user).await?;
        let report = self.router.execute(&decision, self.executor.as_ref()).await?;

        // Multi-step hybrid plans fan their step results into an
        // integration session for a consolidated view
        let integration = if decision.selected == "hybrid" && report.steps.len() > 1 {
            let session = self.integrator.create_session().await;
            for step in &report.steps {
                self.integrator
                    .add_result(
                        &session,
                        step.output.clone(),
                        ResultMetadata {
                            source: step.endpoint.clone(),
                            confidence: decision.confidence,
                            error_count: 0,
                        },
                    )
                    .await?;
            }
            Some(self.integrator.execute_integration(&session).await?)
        } else {
            None
        };

        Ok(CommandOutcome {
            decision,
            report,
            integration,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.synchronizer
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn router(&self) -> &Arc<SmartRouter> {
        &self.router
    }

    pub fn integrator(&self) -> &Arc<ResultIntegrator> {
        &self.integrator
    }

    /// Read a runtime configuration key
    pub fn config_get(&self, key: &str) -> CoreResult<String> {
        self.config.read().get_key(key)
    }

    /// Set a runtime configuration key
    pub fn config_set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.config.write().set_key(key, value)
    }

    /// All runtime-adjustable keys with current values
    pub fn config_list(&self) -> Vec<(String, String)> {
        self.config.read().list_keys()
    }

    /// Drain outstanding work and stop background tasks
    pub async fn shutdown(&self) {
        self.synchronizer.shutdown().await;
        self.bus.shutdown().await;
        tracing::info!("platform shut down");
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("data_dir", &self.config.read().data_dir)
            .finish_non_exhaustive()
    }
}
