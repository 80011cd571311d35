//! Anomaly detection over collected results
//!
//! Three detectors:
//! - statistical: a numeric field value with |z| beyond the sigma threshold
//! - contextual: an item whose feature vector is dissimilar to its group
//! - collective: a source whose results as a whole deviate from the rest
//!
//! Severity derives from the confidence of the offending result: a
//! high-confidence outlier matters more than a speculative one.

use crate::fusion::{cosine_similarity, feature_vector};
use crate::session::ResultItem;
use serde_json::Value;
use std::collections::BTreeMap;

/// Detector that produced the anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Statistical,
    Contextual,
    Collective,
}

/// Severity derived from the offending result's confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

fn severity_from_confidence(confidence: f64) -> AnomalySeverity {
    if confidence > 0.8 {
        AnomalySeverity::High
    } else if confidence > 0.5 {
        AnomalySeverity::Medium
    } else {
        AnomalySeverity::Low
    }
}

/// One detected anomaly
#[derive(Debug, Clone, serde::Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// result id or source tag the anomaly is attributed to
    pub subject: String,
    /// Field for statistical anomalies
    pub field: Option<String>,
    /// z-score, similarity, or deviation depending on the detector
    pub score: f64,
    pub severity: AnomalySeverity,
}

/// Run all three detectors
pub fn detect(items: &[&ResultItem], sigma_threshold: f64, similarity_threshold: f64) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    anomalies.extend(statistical(items, sigma_threshold));
    anomalies.extend(contextual(items, similarity_threshold));
    anomalies.extend(collective(items, sigma_threshold));
    anomalies
}

/// |z| > threshold per numeric field
fn statistical(items: &[&ResultItem], sigma_threshold: f64) -> Vec<Anomaly> {
    let mut by_field: BTreeMap<&str, Vec<(&ResultItem, f64)>> = BTreeMap::new();
    for &item in items {
        if let Some(map) = item.data.as_object() {
            for (key, value) in map {
                if let Some(n) = value.as_f64() {
                    by_field.entry(key.as_str()).or_default().push((item, n));
                }
            }
        }
    }

    let mut anomalies = Vec::new();
    for (field, values) in by_field {
        if values.len() < 3 {
            continue;
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|(_, v)| v).sum::<f64>() / n;
        let variance = values.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev < 1e-9 {
            continue;
        }
        for (item, value) in values {
            let z = (value - mean) / std_dev;
            if z.abs() > sigma_threshold {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Statistical,
                    subject: item.result_id.clone(),
                    field: Some(field.to_string()),
                    score: z,
                    severity: severity_from_confidence(item.confidence),
                });
            }
        }
    }
    anomalies
}

/// Item-to-group cosine similarity below the threshold
fn contextual(items: &[&ResultItem], similarity_threshold: f64) -> Vec<Anomaly> {
    if items.len() < 3 {
        return Vec::new();
    }
    let fields: Vec<&str> = {
        let mut fields = Vec::new();
        for item in items {
            if let Some(map) = item.data.as_object() {
                for (key, value) in map {
                    if value.is_number() && !fields.contains(&key.as_str()) {
                        fields.push(key.as_str());
                    }
                }
            }
        }
        fields
    };
    if fields.is_empty() {
        return Vec::new();
    }

    let vectors: Vec<Vec<f64>> = items.iter().map(|i| feature_vector(i, &fields)).collect();
    let mut anomalies = Vec::new();
    for (index, item) in items.iter().enumerate() {
        // Centroid of everything else
        let mut centroid = vec![0.0; fields.len()];
        for (other, vector) in vectors.iter().enumerate() {
            if other == index {
                continue;
            }
            for (c, v) in centroid.iter_mut().zip(vector) {
                *c += v;
            }
        }
        for c in centroid.iter_mut() {
            *c /= (items.len() - 1) as f64;
        }

        let similarity = cosine_similarity(&vectors[index], &centroid);
        if similarity < similarity_threshold {
            anomalies.push(Anomaly {
                kind: AnomalyKind::Contextual,
                subject: item.result_id.clone(),
                field: None,
                score: similarity,
                severity: severity_from_confidence(item.confidence),
            });
        }
    }
    anomalies
}

/// Source-level deviation from the overall mean, in std units
fn collective(items: &[&ResultItem], sigma_threshold: f64) -> Vec<Anomaly> {
    // Compare per-source means of each numeric field against the rest
    let mut field_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut source_values: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for item in items {
        if let Some(map) = item.data.as_object() {
            for (key, value) in map {
                if let Some(n) = value.as_f64() {
                    field_values.entry(key.as_str()).or_default().push(n);
                    source_values
                        .entry((item.source.as_str(), key.as_str()))
                        .or_default()
                        .push(n);
                }
            }
        }
    }

    let mut anomalies = Vec::new();
    for ((source, field), values) in source_values {
        let all = match field_values.get(field) {
            Some(all) if all.len() > values.len() && all.len() >= 4 => all,
            _ => continue,
        };
        let overall_mean = all.iter().sum::<f64>() / all.len() as f64;
        let overall_std = (all.iter().map(|v| (v - overall_mean).powi(2)).sum::<f64>()
            / all.len() as f64)
            .sqrt();
        if overall_std < 1e-9 {
            continue;
        }
        let group_mean = values.iter().sum::<f64>() / values.len() as f64;
        let deviation = (group_mean - overall_mean).abs() / overall_std;
        if deviation > sigma_threshold {
            let confidence = items
                .iter()
                .filter(|i| i.source == source)
                .map(|i| i.confidence)
                .fold(0.0, f64::max);
            anomalies.push(Anomaly {
                kind: AnomalyKind::Collective,
                subject: source.to_string(),
                field: Some(field.to_string()),
                score: deviation,
                severity: severity_from_confidence(confidence),
            });
        }
    }
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

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
    fn test_no_statistical_outlier_in_tight_scores() {
        let a = item("1", "A", 0.9, json!({"score": 80.0}));
        let b = item("2", "B", 0.8, json!({"score": 70.0}));
        let c = item("3", "C", 0.7, json!({"score": 60.0}));
        let anomalies = detect(&[&a, &b, &c], 2.0, 0.3);
        assert!(
            anomalies.iter().all(|a| a.kind != AnomalyKind::Statistical),
            "{anomalies:?}"
        );
    }

    #[test]
    fn test_statistical_outlier_is_flagged() {
        let items: Vec<ResultItem> = vec![
            item("1", "A", 0.9, json!({"score": 100.0})),
            item("2", "B", 0.9, json!({"score": 101.0})),
            item("3", "C", 0.9, json!({"score": 99.0})),
            item("4", "D", 0.9, json!({"score": 100.5})),
            item("5", "E", 0.9, json!({"score": 99.5})),
            item("6", "F", 0.9, json!({"score": 250.0})),
        ];
        let refs: Vec<&ResultItem> = items.iter().collect();
        let anomalies = statistical(&refs, 2.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].subject, "6");
        assert_eq!(anomalies[0].severity, AnomalySeverity::High);
    }

    #[test]
    fn test_severity_tracks_confidence() {
        assert_eq!(severity_from_confidence(0.9), AnomalySeverity::High);
        assert_eq!(severity_from_confidence(0.6), AnomalySeverity::Medium);
        assert_eq!(severity_from_confidence(0.2), AnomalySeverity::Low);
    }

    #[test]
    fn test_contextual_outlier() {
        let items: Vec<ResultItem> = vec![
            item("1", "A", 0.9, json!({"x": 1.0, "y": 0.01})),
            item("2", "B", 0.9, json!({"x": 0.9, "y": 0.02})),
            item("3", "C", 0.9, json!({"x": 1.1, "y": 0.01})),
            item("4", "D", 0.4, json!({"x": 0.01, "y": 1.0})),
        ];
        let refs: Vec<&ResultItem> = items.iter().collect();
        let anomalies = contextual(&refs, 0.5);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].subject, "4");
        assert_eq!(anomalies[0].severity, AnomalySeverity::Low);
    }

    #[test]
    fn test_collective_deviation_by_source() {
        let items: Vec<ResultItem> = vec![
            item("1", "good", 0.9, json!({"latency": 10.0})),
            item("2", "good", 0.9, json!({"latency": 11.0})),
            item("3", "good", 0.9, json!({"latency": 9.0})),
            item("4", "good", 0.9, json!({"latency": 10.5})),
            item("5", "bad", 0.9, json!({"latency": 50.0})),
            item("6", "bad", 0.9, json!({"latency": 55.0})),
        ];
        let refs: Vec<&ResultItem> = items.iter().collect();
        let anomalies = collective(&refs, 1.0);
        assert!(anomalies.iter().any(|a| a.subject == "bad"));
    }
}
