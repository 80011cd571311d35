//! Multi-dimensional decision engine
//!
//! Scores each candidate strategy across eight dimensions. Evaluators run
//! concurrently and are independently fallible: a failed dimension defaults
//! to 0.5 and is reported as a warning rather than aborting the decision.
//! Evaluations are cached under an LRU keyed by the command shape; bumping
//! the weight epoch invalidates every cached entry.

use crate::context::{CommandAnalysis, CommandType, Intent};
use crate::error::RouterResult;
use crate::strategy::RoutingStrategy;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Scoring dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Efficiency,
    Accuracy,
    Reliability,
    Speed,
    ResourceUsage,
    Cost,
    Risk,
    Compatibility,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Efficiency,
        Dimension::Accuracy,
        Dimension::Reliability,
        Dimension::Speed,
        Dimension::ResourceUsage,
        Dimension::Cost,
        Dimension::Risk,
        Dimension::Compatibility,
    ];
}

/// Normalized weight vector over the eight dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightVector(BTreeMap<Dimension, f64>);

impl Default for WeightVector {
    fn default() -> Self {
        let uniform = 1.0 / Dimension::ALL.len() as f64;
        Self(Dimension::ALL.iter().map(|d| (*d, uniform)).collect())
    }
}

impl WeightVector {
    /// Build from raw weights; normalizes so the sum is 1.0
    pub fn new(weights: BTreeMap<Dimension, f64>) -> Self {
        let mut vector = Self(weights);
        for dimension in Dimension::ALL {
            vector.0.entry(dimension).or_insert(0.0);
        }
        vector.normalize();
        vector
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        self.0.get(&dimension).copied().unwrap_or(0.0)
    }

    fn normalize(&mut self) {
        let sum: f64 = self.0.values().sum();
        if sum <= f64::EPSILON {
            *self = Self::default();
            return;
        }
        for weight in self.0.values_mut() {
            *weight /= sum;
        }
    }

    /// Nudge one dimension and renormalize
    pub fn adjust(&mut self, dimension: Dimension, delta: f64) {
        let entry = self.0.entry(dimension).or_insert(0.0);
        *entry = (*entry + delta).max(0.0);
        self.normalize();
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }
}

/// Score card for one strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyEvaluation {
    pub strategy: String,
    pub scores: BTreeMap<Dimension, f64>,
    pub weighted_score: f64,
    /// Base confidence before strategy-match bonuses
    pub confidence: f64,
    /// Fraction of dimensions whose evaluator succeeded
    pub coverage: f64,
    /// Dimensions that fell back to the 0.5 default
    pub failed_dimensions: Vec<Dimension>,
    pub evaluation_ms: u64,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    strategy: String,
    command_type: CommandType,
    complexity_bucket: u8,
    intent: Intent,
    requirements_digest: String,
    weight_epoch: u64,
}

/// Multi-dimensional strategy scorer with an LRU evaluation cache
pub struct DecisionEngine {
    weights: RwLock<WeightVector>,
    weight_epoch: AtomicU64,
    cache: Mutex<LruCache<CacheKey, StrategyEvaluation>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl DecisionEngine {
    pub fn new(cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            weights: RwLock::new(WeightVector::default()),
            weight_epoch: AtomicU64::new(0),
            cache: Mutex::new(LruCache::new(capacity)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn weights(&self) -> WeightVector {
        self.weights.read().clone()
    }

    /// Replace the weight vector; invalidates cached evaluations
    pub fn set_weights(&self, weights: WeightVector) {
        *self.weights.write() = weights;
        self.weight_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Nudge one weight; invalidates cached evaluations
    pub fn adjust_weight(&self, dimension: Dimension, delta: f64) {
        self.weights.write().adjust(dimension, delta);
        self.weight_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Evaluate one strategy against an analysis, serving from cache when
    /// the command shape and weight epoch match
    pub async fn evaluate(
        &self,
        strategy: &RoutingStrategy,
        analysis: &CommandAnalysis,
    ) -> StrategyEvaluation {
        let key = self.cache_key(strategy, analysis);
        if let Some(hit) = self.cache.lock().get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return hit.clone();
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let futures = Dimension::ALL.map(|dimension| evaluate_dimension(dimension, strategy, analysis));
        let outcomes = futures::future::join_all(futures).await;

        let mut scores = BTreeMap::new();
        let mut failed = Vec::new();
        for (dimension, outcome) in Dimension::ALL.iter().zip(outcomes) {
            match outcome {
                Ok(score) => {
                    scores.insert(*dimension, score.clamp(0.0, 1.0));
                }
                Err(e) => {
                    tracing::warn!(?dimension, strategy = strategy.name, error = %e, "evaluator failed, defaulting");
                    scores.insert(*dimension, 0.5);
                    failed.push(*dimension);
                }
            }
        }

        let weights = self.weights.read();
        let weighted_score: f64 = scores
            .iter()
            .map(|(dimension, score)| weights.get(*dimension) * score)
            .sum();
        drop(weights);

        let coverage =
            (Dimension::ALL.len() - failed.len()) as f64 / Dimension::ALL.len() as f64;
        let confidence = ((0.5 + (weighted_score - 0.5) * 0.5) * coverage).clamp(0.0, 1.0);

        let evaluation = StrategyEvaluation {
            strategy: strategy.name.clone(),
            scores,
            weighted_score,
            confidence,
            coverage,
            failed_dimensions: failed,
            evaluation_ms: started.elapsed().as_millis() as u64,
        };
        self.cache.lock().put(key, evaluation.clone());
        evaluation
    }

    /// Evaluate all candidates concurrently
    pub async fn evaluate_all(
        &self,
        candidates: &[RoutingStrategy],
        analysis: &CommandAnalysis,
    ) -> Vec<StrategyEvaluation> {
        futures::future::join_all(
            candidates
                .iter()
                .map(|strategy| self.evaluate(strategy, analysis)),
        )
        .await
    }

    fn cache_key(&self, strategy: &RoutingStrategy, analysis: &CommandAnalysis) -> CacheKey {
        CacheKey {
            strategy: strategy.name.clone(),
            command_type: analysis.command_type,
            complexity_bucket: (analysis.complexity * 10.0).floor().min(10.0) as u8,
            intent: analysis.intent,
            requirements_digest: requirements_digest(analysis),
            weight_epoch: self.weight_epoch.load(Ordering::SeqCst),
        }
    }
}

/// Canonical digest of the requirements: vectors sorted before hashing so
/// key order can never change the digest
pub(crate) fn requirements_digest(analysis: &CommandAnalysis) -> String {
    let mut files = analysis.requirements.files.clone();
    let mut technologies = analysis.requirements.technologies.clone();
    let mut actions = analysis.requirements.actions.clone();
    files.sort();
    technologies.sort();
    actions.sort();

    let mut hasher = Sha256::new();
    for group in [&files, &technologies, &actions] {
        for item in group {
            hasher.update(item.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xff]);
    }
    hex::encode(hasher.finalize())
}

/// Heuristic per-dimension scoring
async fn evaluate_dimension(
    dimension: Dimension,
    strategy: &RoutingStrategy,
    analysis: &CommandAnalysis,
) -> RouterResult<f64> {
    let complexity = analysis.complexity;
    let band_fit = {
        let center = strategy.complexity_center();
        let half_width = ((strategy.complexity_range.1 - strategy.complexity_range.0) / 2.0).max(0.05);
        (1.0 - (complexity - center).abs() / half_width).clamp(0.0, 1.0)
    };
    let plan_len = strategy.plan.len() as f64;

    let quality = strategy.base_quality;

    let score = match dimension {
        // Fewer steps do the same work faster
        Dimension::Efficiency => 1.0 - (plan_len - 1.0) * 0.12,
        // Thorough strategies inside their band answer more accurately
        Dimension::Accuracy => {
            let mut score = quality * (0.6 + 0.4 * band_fit);
            if strategy.preferred_types.contains(&analysis.command_type) {
                score += 0.1;
            }
            score
        }
        Dimension::Reliability => 0.55 + 0.45 * quality - (plan_len - 1.0) * 0.05,
        Dimension::Speed => 1.0 - (plan_len - 1.0) * 0.15 - complexity * 0.2,
        Dimension::ResourceUsage => 1.0 - plan_len * 0.1 - complexity * 0.15,
        Dimension::Cost => 1.0 - plan_len * 0.12,
        Dimension::Risk => 0.3 + 0.6 * quality - complexity * 0.2 + 0.1 * band_fit,
        Dimension::Compatibility => {
            let mut score = if strategy.preferred_types.contains(&analysis.command_type) {
                0.95
            } else if strategy.command_types.is_empty()
                || strategy.command_types.contains(&analysis.command_type)
            {
                0.6
            } else {
                0.3
            };
            if strategy.preferred_intents.contains(&analysis.intent) {
                score += 0.05;
            }
            score
        }
    };
    Ok(score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAnalyzer;
    use crate::strategy::builtin_strategies;
    use tandem_core::Command;

    fn analysis(raw: &str) -> CommandAnalysis {
        ContextAnalyzer::new().analyze(&Command::parse(raw).unwrap())
    }

    #[test]
    fn test_weights_normalize_to_one() {
        let mut raw = BTreeMap::new();
        raw.insert(Dimension::Speed, 3.0);
        raw.insert(Dimension::Accuracy, 1.0);
        let weights = WeightVector::new(raw);
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.get(Dimension::Speed) > weights.get(Dimension::Accuracy));
    }

    #[test]
    fn test_adjust_keeps_normalization() {
        let mut weights = WeightVector::default();
        weights.adjust(Dimension::Reliability, 0.5);
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.get(Dimension::Reliability) > 1.0 / 8.0);
    }

    #[tokio::test]
    async fn test_evaluation_covers_all_dimensions() {
        let engine = DecisionEngine::new(100);
        let strategies = builtin_strategies();
        let evaluation = engine
            .evaluate(&strategies[0], &analysis("/sc:analyze main.ts"))
            .await;
        assert_eq!(evaluation.scores.len(), 8);
        assert!((0.0..=1.0).contains(&evaluation.weighted_score));
        assert_eq!(evaluation.coverage, 1.0);
        assert!(evaluation.failed_dimensions.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_is_deterministic() {
        let engine = DecisionEngine::new(100);
        let strategies = builtin_strategies();
        let analysis = analysis("/sc:analyze main.ts");

        let first = engine.evaluate(&strategies[0], &analysis).await;
        let second = engine.evaluate(&strategies[0], &analysis).await;
        assert_eq!(first.weighted_score, second.weighted_score);
        assert_eq!(first.scores, second.scores);

        let (hits, misses) = engine.cache_stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[tokio::test]
    async fn test_weight_change_invalidates_cache() {
        let engine = DecisionEngine::new(100);
        let strategies = builtin_strategies();
        let analysis = analysis("/sc:analyze main.ts");

        engine.evaluate(&strategies[0], &analysis).await;
        engine.adjust_weight(Dimension::Speed, 0.5);
        engine.evaluate(&strategies[0], &analysis).await;

        let (hits, misses) = engine.cache_stats();
        assert_eq!(hits, 0);
        assert_eq!(misses, 2);
    }

    #[test]
    fn test_requirements_digest_is_order_insensitive() {
        let mut a = analysis("/sc:analyze main.ts util.py");
        let mut b = a.clone();
        b.requirements.files.reverse();
        b.requirements.technologies.reverse();
        assert_eq!(requirements_digest(&a), requirements_digest(&b));

        a.requirements.files.push("other.rs".to_string());
        assert_ne!(requirements_digest(&a), requirements_digest(&b));
    }

    #[tokio::test]
    async fn test_distinct_commands_get_distinct_cache_slots() {
        let engine = DecisionEngine::new(100);
        let strategies = builtin_strategies();
        engine
            .evaluate(&strategies[0], &analysis("/sc:analyze main.ts"))
            .await;
        engine
            .evaluate(&strategies[0], &analysis("pm:status"))
            .await;
        let (hits, misses) = engine.cache_stats();
        assert_eq!(hits, 0);
        assert_eq!(misses, 2);
    }
}
