//! Conflict detection across results
//!
//! Divergences between collected results fall into four categories: value
//! (same field, different values), logical (contradictory booleans),
//! temporal (stale results mixed with fresh ones), and source (one source
//! contradicting itself). Resolution prefers the highest-confidence
//! contribution, mirroring the state-layer strategy catalog at result scope.

use crate::session::ResultItem;
use chrono::Duration;
use serde_json::Value;
use std::collections::BTreeMap;

/// Category of a cross-result conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictCategory {
    Value,
    Logical,
    Temporal,
    Source,
}

/// One contribution to a conflicting field
#[derive(Debug, Clone, serde::Serialize)]
pub struct Contribution {
    pub result_id: String,
    pub source: String,
    pub value: Value,
    pub confidence: f64,
}

/// A detected divergence between results
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResultConflict {
    pub category: ConflictCategory,
    pub field: String,
    pub contributions: Vec<Contribution>,
    /// Value chosen by highest-confidence resolution
    pub resolved_value: Value,
}

/// Numeric divergence below this relative spread is noise, not conflict
const NUMERIC_TOLERANCE: f64 = 0.05;
/// Results older than this (relative to the newest) are temporally suspect
const STALENESS_MINUTES: i64 = 5;

/// Detect conflicts across all collected results
pub fn detect(items: &[&ResultItem]) -> Vec<ResultConflict> {
    let mut conflicts = Vec::new();

    // Field-wise comparison over the union of object fields
    let mut by_field: BTreeMap<&str, Vec<&ResultItem>> = BTreeMap::new();
    for &item in items {
        if let Some(map) = item.data.as_object() {
            for key in map.keys() {
                by_field.entry(key.as_str()).or_default().push(item);
            }
        }
    }

    for (field, holders) in &by_field {
        if holders.len() < 2 {
            continue;
        }
        let values: Vec<&Value> = holders
            .iter()
            .filter_map(|item| item.data.get(*field))
            .collect();

        let booleans: Vec<bool> = values.iter().filter_map(|v| v.as_bool()).collect();
        let numerics: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();

        let category = if booleans.len() == values.len() {
            let contradictory = booleans.iter().any(|b| *b) && booleans.iter().any(|b| !*b);
            contradictory.then_some(ConflictCategory::Logical)
        } else if numerics.len() == values.len() {
            let max = numerics.iter().cloned().fold(f64::MIN, f64::max);
            let min = numerics.iter().cloned().fold(f64::MAX, f64::min);
            let scale = max.abs().max(min.abs()).max(1e-9);
            ((max - min) / scale > NUMERIC_TOLERANCE).then_some(ConflictCategory::Value)
        } else {
            let first = values[0];
            values.iter().any(|v| *v != first).then_some(ConflictCategory::Value)
        };

        if let Some(category) = category {
            conflicts.push(build_conflict(category, field, holders));
        }
    }

    // Temporal: a stale result mixed with fresh ones
    if let Some(newest) = items.iter().map(|i| i.timestamp).max() {
        let stale: Vec<&&ResultItem> = items
            .iter()
            .filter(|i| newest - i.timestamp > Duration::minutes(STALENESS_MINUTES))
            .collect();
        if !stale.is_empty() && stale.len() < items.len() {
            for item in stale {
                conflicts.push(ResultConflict {
                    category: ConflictCategory::Temporal,
                    field: "timestamp".to_string(),
                    contributions: vec![Contribution {
                        result_id: item.result_id.clone(),
                        source: item.source.clone(),
                        value: Value::String(item.timestamp.to_rfc3339()),
                        confidence: item.confidence,
                    }],
                    resolved_value: Value::String(newest.to_rfc3339()),
                });
            }
        }
    }

    // Source: the same source reporting diverging values for a field
    let mut by_source: BTreeMap<&str, Vec<&ResultItem>> = BTreeMap::new();
    for &item in items {
        by_source.entry(item.source.as_str()).or_default().push(item);
    }
    for (source, members) in by_source {
        if members.len() < 2 {
            continue;
        }
        let fields: Vec<&str> = members
            .iter()
            .filter_map(|m| m.data.as_object())
            .flat_map(|map| map.keys().map(String::as_str))
            .collect();
        for field in fields {
            let values: Vec<&Value> =
                members.iter().filter_map(|m| m.data.get(field)).collect();
            if values.len() >= 2 && values.iter().any(|v| *v != values[0]) {
                let already = conflicts.iter().any(|c| {
                    c.category == ConflictCategory::Source && c.field == field
                });
                if !already {
                    tracing::debug!(source, field, "source self-contradiction");
                    conflicts.push(build_conflict(ConflictCategory::Source, field, &members));
                }
            }
        }
    }

    conflicts
}

fn build_conflict(
    category: ConflictCategory,
    field: &str,
    holders: &[&ResultItem],
) -> ResultConflict {
    let contributions: Vec<Contribution> = holders
        .iter()
        .filter_map(|item| {
            item.data.get(field).map(|value| Contribution {
                result_id: item.result_id.clone(),
                source: item.source.clone(),
                value: value.clone(),
                confidence: item.confidence,
            })
        })
        .collect();
    let resolved_value = contributions
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|c| c.value.clone())
        .unwrap_or(Value::Null);

    ResultConflict {
        category,
        field: field.to_string(),
        contributions,
        resolved_value,
    }
}
