//! Registry of named circuit breakers
//!
//! One breaker per logical endpoint, created on first use with the platform
//! defaults unless an explicit configuration is supplied. The registry caps
//! the total number of instances.

use crate::breaker::{CircuitBreaker, CircuitConfig, CircuitStats};
use crate::error::{CircuitError, CircuitResult};
use dashmap::DashMap;
use std::sync::Arc;
use tandem_core::config::ResilienceConfig;

/// Registry keyed by endpoint name
pub struct CircuitBreakerRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
    defaults: ResilienceConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            defaults,
        }
    }

    /// Fetch the breaker for `name`, creating it with defaults on first use
    pub fn get_or_create(&self, name: &str) -> CircuitResult<Arc<CircuitBreaker>> {
        self.get_or_create_with(name, || CircuitConfig::from_defaults(&self.defaults))
    }

    /// Fetch the breaker for `name`, creating it with `make_config` on first use
    pub fn get_or_create_with<F>(&self, name: &str, make_config: F) -> CircuitResult<Arc<CircuitBreaker>>
    where
        F: FnOnce() -> CircuitConfig,
    {
        if let Some(existing) = self.circuits.get(name) {
            return Ok(existing.clone());
        }
        if self.circuits.len() >= self.defaults.max_circuits {
            return Err(CircuitError::RegistryFull {
                max: self.defaults.max_circuits,
            });
        }
        let created = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, make_config())));
        Ok(created.clone())
    }

    /// Fetch an existing breaker
    pub fn get(&self, name: &str) -> CircuitResult<Arc<CircuitBreaker>> {
        self.circuits
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| CircuitError::NotFound(name.to_string()))
    }

    /// Drop a breaker; returns false when the name is unknown
    pub fn remove(&self, name: &str) -> bool {
        self.circuits.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Status snapshot of every registered circuit
    pub fn health(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_registry(max: usize) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(ResilienceConfig {
            max_circuits: max,
            ..ResilienceConfig::default()
        })
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = small_registry(10);
        let a = registry.get_or_create("payments").unwrap();
        let b = registry.get_or_create("payments").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity_cap_is_enforced() {
        let registry = small_registry(2);
        registry.get_or_create("a").unwrap();
        registry.get_or_create("b").unwrap();
        let err = registry.get_or_create("c").unwrap_err();
        assert!(matches!(err, CircuitError::RegistryFull { max: 2 }));
        // Existing names still resolve
        assert!(registry.get_or_create("a").is_ok());
    }

    #[test]
    fn test_get_unknown_fails() {
        let registry = small_registry(2);
        assert!(matches!(
            registry.get("nope"),
            Err(CircuitError::NotFound(_))
        ));
    }

    #[test]
    fn test_health_reports_all_circuits() {
        let registry = small_registry(5);
        registry.get_or_create("b").unwrap();
        registry.get_or_create("a").unwrap();
        let health = registry.health();
        let names: Vec<_> = health.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
