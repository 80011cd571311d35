//! Conflict detection and resolution
//!
//! A conflict is a diverging leaf between two states sharing a base.
//! Detection classifies each divergence; resolution applies a strategy per
//! conflict and records the outcome in a rolling history window persisted to
//! `conflicts/history.json`.

use crate::diff::{diff, get_path, value_type};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Classification of a detected divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the same field relative to the base, or the sides
    /// diverge with no base to arbitrate
    ConcurrentModification,
    /// A field was removed on one side but changed on the other
    SchemaMismatch,
    /// The JSON type of the field differs between the sides
    TypeConflict,
    /// A registered validation rule rejected the source value
    ValidationError,
    /// A field requires another that the merge result would lack
    DependencyConflict,
}

/// Conflict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A detected divergence between source and target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Dotted path of the diverging field
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
    pub base_value: Option<Value>,
    pub severity: Severity,
    /// Whether an automatic strategy may resolve this conflict
    pub resolvable: bool,
}

/// Strategy for resolving a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Shallow union preferring the target; numerics average when weighted
    AutoMerge,
    SourceWins,
    TargetWins,
    /// Newer snapshot timestamp wins; ties prefer the target
    NewestWins,
    /// Base-aware merge: the unchanged side yields to the changed one
    ThreeWayMerge,
    /// Escalate to an operator
    Manual,
}

impl FromStr for ResolutionStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto-merge" | "auto" => Ok(Self::AutoMerge),
            "source-wins" | "source" => Ok(Self::SourceWins),
            "target-wins" | "target" => Ok(Self::TargetWins),
            "newest-wins" | "newest" => Ok(Self::NewestWins),
            "three-way-merge" | "three-way" => Ok(Self::ThreeWayMerge),
            "manual" => Ok(Self::Manual),
            other => Err(SyncError::UnknownStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AutoMerge => "auto-merge",
            Self::SourceWins => "source-wins",
            Self::TargetWins => "target-wins",
            Self::NewestWins => "newest-wins",
            Self::ThreeWayMerge => "three-way-merge",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub field: String,
    pub strategy: ResolutionStrategy,
    pub resolved_value: Value,
    pub at: DateTime<Utc>,
}

/// Persisted record of one resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub field: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub strategy: ResolutionStrategy,
    pub resolved_value: Value,
    pub at: DateTime<Utc>,
}

/// Validation rule applied to source values during detection
pub struct ValidationRule {
    pub name: String,
    /// Dotted field path the rule applies to
    pub field: String,
    pub check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

/// Dependency rule: `field` present requires `requires` present
#[derive(Debug, Clone)]
pub struct DependencyRule {
    pub field: String,
    pub requires: String,
}

/// Inputs to [`ConflictResolver::detect`]
pub struct DetectionContext<'a> {
    pub source: &'a Value,
    pub target: &'a Value,
    pub base: Option<&'a Value>,
    pub source_ts: DateTime<Utc>,
    pub target_ts: DateTime<Utc>,
}

/// Weights used by [`ResolutionStrategy::AutoMerge`] for numeric fields
#[derive(Debug, Clone, Copy)]
pub struct MergeWeights {
    pub source: f64,
    pub target: f64,
}

/// Detects and resolves state divergences
pub struct ConflictResolver {
    validation_rules: Vec<ValidationRule>,
    dependency_rules: Vec<DependencyRule>,
    history: Mutex<VecDeque<ResolutionRecord>>,
    history_limit: usize,
    history_path: Option<PathBuf>,
}

impl ConflictResolver {
    pub fn new(history_limit: usize) -> Self {
        Self {
            validation_rules: Vec::new(),
            dependency_rules: Vec::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
            history_path: None,
        }
    }

    /// Persist resolution records under `<data_dir>/conflicts/history.json`
    pub fn with_history_dir(mut self, data_dir: &Path) -> Self {
        self.history_path = Some(data_dir.join("conflicts").join("history.json"));
        self
    }

    pub fn add_validation_rule(&mut self, rule: ValidationRule) {
        self.validation_rules.push(rule);
    }

    pub fn add_dependency_rule(&mut self, rule: DependencyRule) {
        self.dependency_rules.push(rule);
    }

    /// Classify every divergence between source and target
    pub fn detect(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let changes = diff(ctx.source, ctx.target);

        for (field, change) in &changes.modified {
            let base_value = ctx.base.and_then(|b| get_path(b, field)).cloned();

            let (kind, severity) = if change.type_changed {
                // An object collapsing to a scalar (or the reverse) cannot be
                // merged field-wise
                let structural = matches!(&change.before, Value::Object(_))
                    || matches!(&change.after, Value::Object(_));
                if structural {
                    (ConflictKind::TypeConflict, Severity::Critical)
                } else {
                    (ConflictKind::TypeConflict, Severity::Medium)
                }
            } else {
                (ConflictKind::ConcurrentModification, Severity::High)
            };

            conflicts.push(Conflict {
                kind,
                field: field.clone(),
                source_value: change.before.clone(),
                target_value: change.after.clone(),
                base_value,
                severity,
                resolvable: severity != Severity::Critical,
            });
        }

        // Removals that the source still modifies relative to the base are
        // schema mismatches rather than clean deletions
        for (field, target_value) in &changes.removed {
            if let Some(base) = ctx.base {
                if let Some(base_value) = get_path(base, field) {
                    if base_value != target_value {
                        conflicts.push(Conflict {
                            kind: ConflictKind::SchemaMismatch,
                            field: field.clone(),
                            source_value: Value::Null,
                            target_value: target_value.clone(),
                            base_value: Some(base_value.clone()),
                            severity: Severity::Medium,
                            resolvable: true,
                        });
                    }
                }
            }
        }

        for rule in &self.validation_rules {
            if let Some(value) = get_path(ctx.source, &rule.field) {
                if !(rule.check)(value) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::ValidationError,
                        field: rule.field.clone(),
                        source_value: value.clone(),
                        target_value: get_path(ctx.target, &rule.field)
                            .cloned()
                            .unwrap_or(Value::Null),
                        base_value: None,
                        severity: Severity::Low,
                        resolvable: true,
                    });
                }
            }
        }

        for rule in &self.dependency_rules {
            let field_present =
                get_path(ctx.source, &rule.field).is_some() || get_path(ctx.target, &rule.field).is_some();
            let dependency_present = get_path(ctx.source, &rule.requires).is_some()
                || get_path(ctx.target, &rule.requires).is_some();
            if field_present && !dependency_present {
                conflicts.push(Conflict {
                    kind: ConflictKind::DependencyConflict,
                    field: rule.field.clone(),
                    source_value: get_path(ctx.source, &rule.field).cloned().unwrap_or(Value::Null),
                    target_value: get_path(ctx.target, &rule.field).cloned().unwrap_or(Value::Null),
                    base_value: None,
                    severity: Severity::High,
                    resolvable: false,
                });
            }
        }

        conflicts
    }

    /// Apply a strategy to one conflict; `None` means escalation
    pub fn resolve(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        ctx: &DetectionContext<'_>,
        weights: Option<MergeWeights>,
    ) -> Option<Resolution> {
        // Critical conflicts only yield to an explicit side choice
        if conflict.severity == Severity::Critical
            && !matches!(
                strategy,
                ResolutionStrategy::SourceWins | ResolutionStrategy::TargetWins
            )
        {
            return None;
        }
        if !conflict.resolvable
            && !matches!(
                strategy,
                ResolutionStrategy::SourceWins | ResolutionStrategy::TargetWins
            )
        {
            return None;
        }

        let resolved_value = match strategy {
            ResolutionStrategy::SourceWins => conflict.source_value.clone(),
            ResolutionStrategy::TargetWins => conflict.target_value.clone(),
            ResolutionStrategy::NewestWins => {
                if ctx.source_ts > ctx.target_ts {
                    conflict.source_value.clone()
                } else {
                    conflict.target_value.clone()
                }
            }
            ResolutionStrategy::AutoMerge => {
                auto_merge_value(&conflict.source_value, &conflict.target_value, weights)
            }
            ResolutionStrategy::ThreeWayMerge => {
                match &conflict.base_value {
                    Some(base) if base == &conflict.source_value => conflict.target_value.clone(),
                    Some(base) if base == &conflict.target_value => conflict.source_value.clone(),
                    _ => deep_merge(&conflict.source_value, &conflict.target_value),
                }
            }
            ResolutionStrategy::Manual => return None,
        };

        let resolution = Resolution {
            field: conflict.field.clone(),
            strategy,
            resolved_value,
            at: Utc::now(),
        };
        self.record(conflict, &resolution);
        Some(resolution)
    }

    fn record(&self, conflict: &Conflict, resolution: &Resolution) {
        let mut history = self.history.lock();
        if history.len() == self.history_limit {
            history.pop_front();
        }
        history.push_back(ResolutionRecord {
            field: conflict.field.clone(),
            kind: conflict.kind,
            severity: conflict.severity,
            strategy: resolution.strategy,
            resolved_value: resolution.resolved_value.clone(),
            at: resolution.at,
        });
    }

    /// Resolution records, oldest first
    pub fn history(&self) -> Vec<ResolutionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Write the rolling window to `conflicts/history.json`
    pub async fn persist_history(&self) -> SyncResult<()> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        let records = self.history();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(path, encoded).await?;
        Ok(())
    }

    /// Load the rolling window written by an earlier run
    pub async fn load_history(&self) -> SyncResult<usize> {
        let Some(path) = &self.history_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(path).await?;
        let records: Vec<ResolutionRecord> = serde_json::from_str(&content)?;
        let loaded = records.len();
        let mut history = self.history.lock();
        *history = records.into_iter().collect();
        while history.len() > self.history_limit {
            history.pop_front();
        }
        Ok(loaded)
    }
}

/// AutoMerge for a single field
fn auto_merge_value(source: &Value, target: &Value, weights: Option<MergeWeights>) -> Value {
    match (source, target) {
        (Value::Object(src), Value::Object(tgt)) => {
            // Shallow union preferring the target
            let mut merged = src.clone();
            for (key, value) in tgt {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (Value::Number(a), Value::Number(b)) => match weights {
            Some(w) if w.source + w.target > 0.0 => {
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                let avg = (a * w.source + b * w.target) / (w.source + w.target);
                serde_json::Number::from_f64(avg).map_or_else(|| target.clone(), Value::Number)
            }
            _ => target.clone(),
        },
        _ => target.clone(),
    }
}

/// Recursive merge preferring `b`
pub(crate) fn deep_merge(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(a_map), Value::Object(b_map)) => {
            let mut merged = a_map.clone();
            for (key, b_value) in b_map {
                let next = match a_map.get(key) {
                    Some(a_value) => deep_merge(a_value, b_value),
                    None => b_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => b.clone(),
    }
}
