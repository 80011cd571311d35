//! Data fusion
//!
//! Results are grouped by inferred semantic category, then each group is
//! fused with the configured strategy:
//! - Weighted: per-field weighted combination, `w = confidence / (1 + errors)`
//! - Consensus: per-field vote; numeric fields take a confidence-weighted
//!   mean, otherwise the highest-confidence value wins
//! - Semantic: cosine-similarity clustering over numeric feature vectors,
//!   then Weighted per cluster

use crate::error::{IntegratorError, IntegratorResult};
use crate::session::ResultItem;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Selectable fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    Weighted,
    Consensus,
    Semantic,
}

impl FromStr for FusionStrategy {
    type Err = IntegratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(Self::Weighted),
            "consensus" => Ok(Self::Consensus),
            "semantic" => Ok(Self::Semantic),
            other => Err(IntegratorError::UnknownFusionStrategy(other.to_string())),
        }
    }
}

/// One fused group of results
#[derive(Debug, Clone, serde::Serialize)]
pub struct FusedGroup {
    /// Inferred semantic category the group shares
    pub category: String,
    pub value: Value,
    /// Combined confidence of the contributing results
    pub confidence: f64,
    /// Number of results fused into this group
    pub support: usize,
    pub strategy: FusionStrategy,
}

/// Category of a result: an explicit `category` field, else the sorted
/// top-level key signature
pub(crate) fn infer_category(item: &ResultItem) -> String {
    if let Some(category) = item.data.get("category").and_then(Value::as_str) {
        return category.to_string();
    }
    match item.data.as_object() {
        Some(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys.join("+")
        }
        None => "scalar".to_string(),
    }
}

/// Fuse all items, grouped by category
pub fn fuse(
    items: &[&ResultItem],
    strategy: FusionStrategy,
    similarity_threshold: f64,
) -> IntegratorResult<Vec<FusedGroup>> {
    let mut groups: BTreeMap<String, Vec<&ResultItem>> = BTreeMap::new();
    for &item in items {
        groups.entry(infer_category(item)).or_default().push(item);
    }

    let mut fused = Vec::new();
    for (category, members) in groups {
        match strategy {
            FusionStrategy::Weighted => fused.push(fuse_weighted(&category, &members)),
            FusionStrategy::Consensus => fused.push(fuse_consensus(&category, &members)),
            FusionStrategy::Semantic => {
                for cluster in cluster_by_similarity(&members, similarity_threshold) {
                    fused.push(fuse_weighted(&category, &cluster));
                }
            }
        }
    }
    Ok(fused)
}

fn field_union<'a>(members: &[&'a ResultItem]) -> Vec<&'a str> {
    let mut fields = Vec::new();
    for member in members {
        if let Some(map) = member.data.as_object() {
            for key in map.keys() {
                if !fields.contains(&key.as_str()) {
                    fields.push(key.as_str());
                }
            }
        }
    }
    fields
}

fn combined_confidence(members: &[&ResultItem]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    members.iter().map(|m| m.confidence).sum::<f64>() / members.len() as f64
}

/// Weighted fusion: normalized `confidence / (1 + errors)` weights per field
fn fuse_weighted(category: &str, members: &[&ResultItem]) -> FusedGroup {
    let mut value = serde_json::Map::new();
    for field in field_union(members) {
        let contributions: Vec<(&ResultItem, &Value)> = members
            .iter()
            .filter_map(|m| m.data.get(field).map(|v| (*m, v)))
            .collect();

        let numeric: Vec<(f64, f64)> = contributions
            .iter()
            .filter_map(|(m, v)| v.as_f64().map(|n| (m.weight(), n)))
            .collect();

        let fused_value = if numeric.len() == contributions.len() && !numeric.is_empty() {
            let weight_sum: f64 = numeric.iter().map(|(w, _)| w).sum();
            if weight_sum > 0.0 {
                let combined = numeric.iter().map(|(w, n)| w * n).sum::<f64>() / weight_sum;
                serde_json::Number::from_f64(combined)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else {
                contributions[0].1.clone()
            }
        } else {
            // Non-numeric: the heaviest contribution wins
            contributions
                .iter()
                .max_by(|a, b| a.0.weight().total_cmp(&b.0.weight()))
                .map(|(_, v)| (*v).clone())
                .unwrap_or(Value::Null)
        };
        value.insert(field.to_string(), fused_value);
    }

    FusedGroup {
        category: category.to_string(),
        value: Value::Object(value),
        confidence: combined_confidence(members),
        support: members.len(),
        strategy: FusionStrategy::Weighted,
    }
}

/// Consensus fusion: per-field vote
fn fuse_consensus(category: &str, members: &[&ResultItem]) -> FusedGroup {
    let mut value = serde_json::Map::new();
    for field in field_union(members) {
        let contributions: Vec<(&ResultItem, &Value)> = members
            .iter()
            .filter_map(|m| m.data.get(field).map(|v| (*m, v)))
            .collect();

        let numeric: Vec<(f64, f64)> = contributions
            .iter()
            .filter_map(|(m, v)| v.as_f64().map(|n| (m.confidence, n)))
            .collect();

        let fused_value = if numeric.len() == contributions.len() && !numeric.is_empty() {
            // Confidence-weighted mean for numeric fields
            let conf_sum: f64 = numeric.iter().map(|(c, _)| c).sum();
            let mean = if conf_sum > 0.0 {
                numeric.iter().map(|(c, n)| c * n).sum::<f64>() / conf_sum
            } else {
                numeric.iter().map(|(_, n)| n).sum::<f64>() / numeric.len() as f64
            };
            serde_json::Number::from_f64(mean)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else {
            // Vote by total confidence per distinct value
            let mut ballots: Vec<(Value, f64)> = Vec::new();
            for (member, v) in &contributions {
                match ballots.iter_mut().find(|(existing, _)| existing == *v) {
                    Some((_, total)) => *total += member.confidence,
                    None => ballots.push(((*v).clone(), member.confidence)),
                }
            }
            ballots
                .into_iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(v, _)| v)
                .unwrap_or(Value::Null)
        };
        value.insert(field.to_string(), fused_value);
    }

    FusedGroup {
        category: category.to_string(),
        value: Value::Object(value),
        confidence: combined_confidence(members),
        support: members.len(),
        strategy: FusionStrategy::Consensus,
    }
}

/// Numeric feature vector over the union of numeric fields
pub(crate) fn feature_vector(item: &ResultItem, fields: &[&str]) -> Vec<f64> {
    fields
        .iter()
        .map(|f| item.data.get(*f).and_then(Value::as_f64).unwrap_or(0.0))
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy clustering: an item joins the first cluster whose seed it is
/// similar enough to, else starts its own
fn cluster_by_similarity<'a>(
    members: &[&'a ResultItem],
    threshold: f64,
) -> Vec<Vec<&'a ResultItem>> {
    let fields = field_union(members);
    let mut clusters: Vec<(Vec<f64>, Vec<&ResultItem>)> = Vec::new();

    for &member in members {
        let vector = feature_vector(member, &fields);
        match clusters
            .iter_mut()
            .find(|(seed, _)| cosine_similarity(seed, &vector) >= threshold)
        {
            Some((_, cluster)) => cluster.push(member),
            None => clusters.push((vector, vec![member])),
        }
    }
    clusters.into_iter().map(|(_, cluster)| cluster).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use test_case::test_case;

    fn item(id: &str, source: &str, confidence: f64, data: Value) -> ResultItem {
        ResultItem {
            result_id: id.to_string(),
            source: source.to_string(),
            confidence,
            error_count: 0,
            data,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_weighted_fusion_of_scores() {
        let a = item("1", "A", 0.9, json!({"score": 80.0}));
        let b = item("2", "B", 0.8, json!({"score": 70.0}));
        let c = item("3", "C", 0.7, json!({"score": 60.0}));
        let items: Vec<&ResultItem> = vec![&a, &b, &c];

        let fused = fuse(&items, FusionStrategy::Weighted, 0.5).unwrap();
        assert_eq!(fused.len(), 1);
        let score = fused[0].value["score"].as_f64().unwrap();
        // (80*0.9 + 70*0.8 + 60*0.7) / (0.9 + 0.8 + 0.7)
        assert!((score - 70.8333).abs() < 0.01, "score {score}");
        assert_eq!(fused[0].support, 3);
    }

    #[test]
    fn test_weighted_fusion_discounts_error_counts() {
        let mut a = item("1", "A", 0.9, json!({"score": 100.0}));
        a.error_count = 9; // weight 0.09
        let b = item("2", "B", 0.9, json!({"score": 0.0}));
        let items: Vec<&ResultItem> = vec![&a, &b];

        let fused = fuse(&items, FusionStrategy::Weighted, 0.5).unwrap();
        let score = fused[0].value["score"].as_f64().unwrap();
        // 100*0.09 / (0.09 + 0.9) ≈ 9.09
        assert!(score < 10.0, "score {score}");
    }

    #[test]
    fn test_consensus_votes_on_strings() {
        let a = item("1", "A", 0.6, json!({"verdict": "pass"}));
        let b = item("2", "B", 0.5, json!({"verdict": "pass"}));
        let c = item("3", "C", 0.9, json!({"verdict": "fail"}));
        let items: Vec<&ResultItem> = vec![&a, &b, &c];

        let fused = fuse(&items, FusionStrategy::Consensus, 0.5).unwrap();
        // pass has 1.1 total confidence against fail's 0.9
        assert_eq!(fused[0].value["verdict"], json!("pass"));
    }

    #[test]
    fn test_distinct_categories_fuse_separately() {
        let a = item("1", "A", 0.9, json!({"score": 1.0}));
        let b = item("2", "B", 0.9, json!({"latency": 5.0}));
        let items: Vec<&ResultItem> = vec![&a, &b];

        let fused = fuse(&items, FusionStrategy::Weighted, 0.5).unwrap();
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_explicit_category_field_wins() {
        let a = item("1", "A", 0.9, json!({"category": "quality", "score": 1.0}));
        let b = item("2", "B", 0.9, json!({"category": "quality", "score": 3.0}));
        let items: Vec<&ResultItem> = vec![&a, &b];
        let fused = fuse(&items, FusionStrategy::Weighted, 0.5).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].category, "quality");
    }

    #[test]
    fn test_semantic_clusters_dissimilar_results() {
        let a = item("1", "A", 0.9, json!({"x": 1.0, "y": 0.0}));
        let b = item("2", "B", 0.9, json!({"x": 0.9, "y": 0.1}));
        let c = item("3", "C", 0.9, json!({"x": 0.0, "y": 1.0}));
        let items: Vec<&ResultItem> = vec![&a, &b, &c];

        let fused = fuse(&items, FusionStrategy::Semantic, 0.8).unwrap();
        // a and b cluster; c is orthogonal and stands alone
        assert_eq!(fused.len(), 2);
        let supports: Vec<usize> = fused.iter().map(|g| g.support).collect();
        assert!(supports.contains(&2));
        assert!(supports.contains(&1));
    }

    #[test_case("weighted", FusionStrategy::Weighted)]
    #[test_case("consensus", FusionStrategy::Consensus)]
    #[test_case("semantic", FusionStrategy::Semantic)]
    fn test_strategy_parsing(input: &str, expected: FusionStrategy) {
        assert_eq!(FusionStrategy::from_str(input).unwrap(), expected);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(FusionStrategy::from_str("bogus").is_err());
    }
}
