//! Insight generation
//!
//! Condenses a session's fusion, conflict, and anomaly output into a short
//! list of operator-facing observations and recommendations.

use crate::anomaly::{Anomaly, AnomalyKind, AnomalySeverity};
use crate::conflict::ResultConflict;
use crate::fusion::FusedGroup;
use crate::session::ResultItem;

/// Kind of generated insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Summary,
    Quality,
    Conflict,
    Anomaly,
    Recommendation,
}

/// One operator-facing observation
#[derive(Debug, Clone, serde::Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
}

/// Generate insights for one completed pipeline run
pub fn generate(
    items: &[&ResultItem],
    fused: &[FusedGroup],
    conflicts: &[ResultConflict],
    anomalies: &[Anomaly],
) -> Vec<Insight> {
    let mut insights = Vec::new();

    let sources: std::collections::BTreeSet<&str> =
        items.iter().map(|i| i.source.as_str()).collect();
    insights.push(Insight {
        kind: InsightKind::Summary,
        message: format!(
            "fused {} result(s) from {} source(s) into {} group(s)",
            items.len(),
            sources.len(),
            fused.len()
        ),
    });

    // Data quality: average confidence discounted by conflict rate
    let avg_confidence = if items.is_empty() {
        0.0
    } else {
        items.iter().map(|i| i.confidence).sum::<f64>() / items.len() as f64
    };
    let conflict_rate = if items.is_empty() {
        0.0
    } else {
        conflicts.len() as f64 / items.len() as f64
    };
    let quality = (avg_confidence * (1.0 - conflict_rate * 0.5)).clamp(0.0, 1.0);
    insights.push(Insight {
        kind: InsightKind::Quality,
        message: format!(
            "data quality {quality:.2} (avg confidence {avg_confidence:.2}, {} conflict(s))",
            conflicts.len()
        ),
    });

    for conflict in conflicts {
        insights.push(Insight {
            kind: InsightKind::Conflict,
            message: format!(
                "{:?} conflict on '{}' across {} contribution(s); resolved by confidence",
                conflict.category,
                conflict.field,
                conflict.contributions.len()
            ),
        });
    }

    for anomaly in anomalies {
        insights.push(Insight {
            kind: InsightKind::Anomaly,
            message: match anomaly.kind {
                AnomalyKind::Statistical => format!(
                    "result {} is a statistical outlier on '{}' (z = {:.2})",
                    anomaly.subject,
                    anomaly.field.as_deref().unwrap_or("?"),
                    anomaly.score
                ),
                AnomalyKind::Contextual => format!(
                    "result {} diverges from its group (similarity {:.2})",
                    anomaly.subject, anomaly.score
                ),
                AnomalyKind::Collective => format!(
                    "source {} deviates from the rest on '{}' ({:.2} sigma)",
                    anomaly.subject,
                    anomaly.field.as_deref().unwrap_or("?"),
                    anomaly.score
                ),
            },
        });
    }

    if anomalies.iter().any(|a| a.severity == AnomalySeverity::High) {
        insights.push(Insight {
            kind: InsightKind::Recommendation,
            message: "review high-severity anomalies before trusting fused values".to_string(),
        });
    }
    if conflict_rate > 0.5 {
        insights.push(Insight {
            kind: InsightKind::Recommendation,
            message: "sources disagree heavily; consider re-running with fewer sources"
                .to_string(),
        });
    }
    if sources.len() == 1 && items.len() > 1 {
        insights.push(Insight {
            kind: InsightKind::Recommendation,
            message: "all results share one source; corroboration is unavailable".to_string(),
        });
    }

    insights
}
