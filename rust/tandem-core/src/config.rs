//! Platform configuration
//!
//! Loading hierarchy: defaults < TOML file < `TANDEM_*` environment
//! overrides. Every subsystem reads its section at construction; a bounded
//! set of keys is additionally adjustable at runtime through `sync:config`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Root of the persisted state layout (events/, states/, conflicts/, learning/)
    pub data_dir: PathBuf,
    pub events: EventsConfig,
    pub state: StateConfig,
    pub router: RouterConfig,
    pub resilience: ResilienceConfig,
    pub integrator: IntegratorConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".tandem"),
            events: EventsConfig::default(),
            state: StateConfig::default(),
            router: RouterConfig::default(),
            resilience: ResilienceConfig::default(),
            integrator: IntegratorConfig::default(),
        }
    }
}

/// Event bus and store tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// In-flight dispatch cap before publishes queue
    pub max_concurrent_events: usize,
    /// Overflow queue cap; beyond this publishes fail with QueueFull
    pub max_queue_size: usize,
    /// Whether published events are appended to the event log
    pub persistence: bool,
    /// Whether store writes are batched
    pub batching: bool,
    /// Batch flush size threshold
    pub batch_size: usize,
    /// Batch flush time threshold in milliseconds
    pub batch_interval_ms: u64,
    /// Soft deadline per handler invocation in milliseconds
    pub handler_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_events: 10,
            max_queue_size: 1000,
            persistence: true,
            batching: false,
            batch_size: 50,
            batch_interval_ms: 100,
            handler_timeout_ms: 5000,
        }
    }
}

/// State synchronizer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Resolution strategy applied when a sync does not name one
    pub default_strategy: String,
    /// Batch mode: flush when this many pending changes accumulate
    pub max_batch_size: usize,
    /// Batch mode: flush interval in milliseconds
    pub batch_interval_ms: u64,
    /// Batch mode: pending changes older than this are dropped
    pub max_wait_time_ms: u64,
    /// Scheduled mode: tick interval in milliseconds
    pub schedule_interval_ms: u64,
    /// Scheduled mode: skip the tick when nothing changed since last sync
    pub skip_if_no_changes: bool,
    /// Snapshot versions kept per type key before pruning
    pub max_versions: usize,
    /// Rolling window of conflict resolution records
    pub conflict_history_limit: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            default_strategy: "newest-wins".to_string(),
            max_batch_size: 20,
            batch_interval_ms: 1000,
            max_wait_time_ms: 5000,
            schedule_interval_ms: 30_000,
            skip_if_no_changes: true,
            max_versions: 50,
            conflict_history_limit: 200,
        }
    }
}

/// Router, decision engine, and learning tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Evaluation cache entries (LRU)
    pub cache_size: usize,
    /// Decision-time budget in milliseconds; breaches warn, never abort
    pub decision_budget_ms: u64,
    /// Completed decisions kept in the history buffer
    pub history_limit: usize,
    /// Samples required before the first training run
    pub min_samples: usize,
    /// Sample log cap; compaction drops the oldest lowest-quality entries
    pub max_samples: usize,
    /// Decision tree depth limit
    pub max_depth: usize,
    /// Minimum samples per decision tree leaf
    pub min_samples_leaf: usize,
    /// Accuracy drop that triggers retraining from a PerformanceMetric report
    pub retrain_threshold: f64,
    /// Dated sample backups kept on disk
    pub max_backups: usize,
    /// Fraction of samples held out for model validation
    pub holdout_fraction: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            decision_budget_ms: 50,
            history_limit: 100,
            min_samples: 20,
            max_samples: 10_000,
            max_depth: 6,
            min_samples_leaf: 5,
            retrain_threshold: 0.1,
            max_backups: 5,
            holdout_fraction: 0.2,
        }
    }
}

/// Circuit breaker defaults; individual circuits may override at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Registry cap on named circuits
    pub max_circuits: usize,
    /// FailureRate trip: failures/total at or above this trips
    pub failure_threshold: f64,
    /// FailureRate trip: minimum requests before the rate is meaningful
    pub minimum_requests: u64,
    /// ConsecutiveFailures trip threshold
    pub consecutive_failures: u32,
    /// Open -> HalfOpen wait in milliseconds
    pub recovery_timeout_ms: u64,
    /// Successes required in HalfOpen to close
    pub half_open_requests: u32,
    /// Sliding statistics window span in milliseconds
    pub window_duration_ms: u64,
    /// Fixed-width buckets covering the window
    pub max_buckets: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_circuits: 100,
            failure_threshold: 0.5,
            minimum_requests: 10,
            consecutive_failures: 10,
            recovery_timeout_ms: 30_000,
            half_open_requests: 3,
            window_duration_ms: 60_000,
            max_buckets: 10,
        }
    }
}

/// Result integrator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Session pipeline deadline in milliseconds; breach warns, never aborts
    pub process_timeout_ms: u64,
    /// Statistical anomaly threshold in standard deviations
    pub sigma_threshold: f64,
    /// Contextual anomaly similarity floor
    pub similarity_threshold: f64,
    /// Process results as they arrive instead of at execute()
    pub realtime: bool,
    /// Fusion strategy: weighted | consensus | semantic
    pub fusion_strategy: String,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            process_timeout_ms: 200,
            sigma_threshold: 2.0,
            similarity_threshold: 0.5,
            realtime: false,
            fusion_strategy: "weighted".to_string(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration: defaults, then the TOML file if present, then
    /// `TANDEM_*` environment overrides
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::debug!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML file
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TANDEM_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("TANDEM_EVENTS_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.events.max_concurrent_events = n;
            }
        }
        if let Ok(v) = std::env::var("TANDEM_EVENTS_MAX_QUEUE_SIZE") {
            if let Ok(n) = v.parse() {
                self.events.max_queue_size = n;
            }
        }
        if let Ok(v) = std::env::var("TANDEM_EVENTS_PERSISTENCE") {
            self.events.persistence = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("TANDEM_STATE_DEFAULT_STRATEGY") {
            self.state.default_strategy = v;
        }
        if let Ok(v) = std::env::var("TANDEM_ROUTER_CACHE_SIZE") {
            if let Ok(n) = v.parse() {
                self.router.cache_size = n;
            }
        }
        if let Ok(v) = std::env::var("TANDEM_RESILIENCE_MAX_CIRCUITS") {
            if let Ok(n) = v.parse() {
                self.resilience.max_circuits = n;
            }
        }
    }

    /// Reject zero caps and out-of-range thresholds
    pub fn validate(&self) -> CoreResult<()> {
        let checks: [(&str, bool, &str); 8] = [
            (
                "events.max_concurrent_events",
                self.events.max_concurrent_events > 0,
                "must be positive",
            ),
            (
                "events.max_queue_size",
                self.events.max_queue_size > 0,
                "must be positive",
            ),
            (
                "resilience.failure_threshold",
                (0.0..=1.0).contains(&self.resilience.failure_threshold),
                "must be within [0, 1]",
            ),
            (
                "resilience.max_circuits",
                self.resilience.max_circuits > 0,
                "must be positive",
            ),
            (
                "router.cache_size",
                self.router.cache_size > 0,
                "must be positive",
            ),
            (
                "router.holdout_fraction",
                (0.0..1.0).contains(&self.router.holdout_fraction),
                "must be within [0, 1)",
            ),
            (
                "state.max_versions",
                self.state.max_versions > 0,
                "must be positive",
            ),
            (
                "integrator.sigma_threshold",
                self.integrator.sigma_threshold > 0.0,
                "must be positive",
            ),
        ];
        for (key, ok, message) in checks {
            if !ok {
                return Err(CoreError::ConfigValue {
                    key: key.to_string(),
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read a runtime-adjustable key as a display string
    pub fn get_key(&self, key: &str) -> CoreResult<String> {
        let value = match key {
            "data_dir" => self.data_dir.display().to_string(),
            "events.max_concurrent_events" => self.events.max_concurrent_events.to_string(),
            "events.max_queue_size" => self.events.max_queue_size.to_string(),
            "events.persistence" => self.events.persistence.to_string(),
            "state.default_strategy" => self.state.default_strategy.clone(),
            "state.max_batch_size" => self.state.max_batch_size.to_string(),
            "state.batch_interval_ms" => self.state.batch_interval_ms.to_string(),
            "state.schedule_interval_ms" => self.state.schedule_interval_ms.to_string(),
            "state.max_versions" => self.state.max_versions.to_string(),
            "router.cache_size" => self.router.cache_size.to_string(),
            "resilience.max_circuits" => self.resilience.max_circuits.to_string(),
            "integrator.process_timeout_ms" => self.integrator.process_timeout_ms.to_string(),
            _ => return Err(CoreError::UnknownConfigKey(key.to_string())),
        };
        Ok(value)
    }

    /// Set a runtime-adjustable key from a display string
    pub fn set_key(&mut self, key: &str, value: &str) -> CoreResult<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
            value.parse().map_err(|_| CoreError::ConfigValue {
                key: key.to_string(),
                message: format!("cannot parse '{value}'"),
            })
        }
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "events.max_concurrent_events" => {
                self.events.max_concurrent_events = parse(key, value)?
            }
            "events.max_queue_size" => self.events.max_queue_size = parse(key, value)?,
            "events.persistence" => self.events.persistence = parse(key, value)?,
            "state.default_strategy" => self.state.default_strategy = value.to_string(),
            "state.max_batch_size" => self.state.max_batch_size = parse(key, value)?,
            "state.batch_interval_ms" => self.state.batch_interval_ms = parse(key, value)?,
            "state.schedule_interval_ms" => self.state.schedule_interval_ms = parse(key, value)?,
            "state.max_versions" => self.state.max_versions = parse(key, value)?,
            "router.cache_size" => self.router.cache_size = parse(key, value)?,
            "resilience.max_circuits" => self.resilience.max_circuits = parse(key, value)?,
            "integrator.process_timeout_ms" => {
                self.integrator.process_timeout_ms = parse(key, value)?
            }
            _ => return Err(CoreError::UnknownConfigKey(key.to_string())),
        }
        self.validate()
    }

    /// All runtime-adjustable keys with their current values
    pub fn list_keys(&self) -> Vec<(String, String)> {
        const KEYS: [&str; 12] = [
            "data_dir",
            "events.max_concurrent_events",
            "events.max_queue_size",
            "events.persistence",
            "state.default_strategy",
            "state.max_batch_size",
            "state.batch_interval_ms",
            "state.schedule_interval_ms",
            "state.max_versions",
            "router.cache_size",
            "resilience.max_circuits",
            "integrator.process_timeout_ms",
        ];
        KEYS.iter()
            .filter_map(|k| self.get_key(k).ok().map(|v| ((*k).to_string(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlatformConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.events.max_concurrent_events, 10);
        assert_eq!(config.integrator.process_timeout_ms, 200);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "data_dir = \"/tmp/tandem-test\"\n[events]\nmax_queue_size = 42"
        )
        .unwrap();

        let config = PlatformConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tandem-test"));
        assert_eq!(config.events.max_queue_size, 42);
        // Untouched sections keep defaults
        assert_eq!(config.events.max_concurrent_events, 10);
        assert_eq!(config.router.cache_size, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = PlatformConfig::default();
        config.events.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_key_roundtrip() {
        let mut config = PlatformConfig::default();
        config.set_key("state.max_batch_size", "7").unwrap();
        assert_eq!(config.get_key("state.max_batch_size").unwrap(), "7");
        assert!(config.set_key("nope.nope", "1").is_err());
        assert!(config.set_key("router.cache_size", "abc").is_err());
    }

    #[test]
    fn test_set_key_revalidates() {
        let mut config = PlatformConfig::default();
        assert!(config.set_key("resilience.max_circuits", "0").is_err());
    }
}
