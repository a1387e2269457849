use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::collectors::flow::CollectionReport;
use crate::models::{CollectedResult, CollectionResult};

/// Per-artifact result counts, split by layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCounts {
    pub raw: usize,
    pub parsed: usize,
    pub anomalies: usize,
}

pub fn count_results(results: &[CollectedResult]) -> BTreeMap<String, ResultCounts> {
    let mut counts: BTreeMap<String, ResultCounts> = BTreeMap::new();
    for result in results {
        let entry = counts.entry(result.artifact.clone()).or_default();
        match result.result {
            CollectionResult::Raw(_) => entry.raw += 1,
            CollectionResult::Parsed(_) => entry.parsed += 1,
            CollectionResult::Anomaly(_) => entry.anomalies += 1,
        }
    }
    counts
}

/// Create a JSON summary of a collection.
///
/// # Example Output
///
/// ```json
/// {
///   "collection_id": "550e8400-e29b-41d4-a716-446655440000",
///   "host_id": "workstation-01",
///   "started": "2024-01-15T14:30:52Z",
///   "finished": "2024-01-15T14:31:07Z",
///   "os": "Linux",
///   "requested": ["SshdConfigFile"],
///   "completed": [...],
///   "failed": {...},
///   "results": {"SshdConfigFile": {"raw": 2, "parsed": 0, "anomalies": 0}}
/// }
/// ```
pub fn create_collection_summary(
    host_id: &str,
    started: DateTime<Utc>,
    report: &CollectionReport,
    results: &[CollectedResult],
) -> Result<String> {
    let result_counts: BTreeMap<String, serde_json::Value> = count_results(results)
        .into_iter()
        .map(|(artifact, counts)| {
            (
                artifact,
                json!({
                    "raw": counts.raw,
                    "parsed": counts.parsed,
                    "anomalies": counts.anomalies,
                }),
            )
        })
        .collect();

    let summary = json!({
        "collection_id": Uuid::new_v4().to_string(),
        "host_id": host_id,
        "started": started.to_rfc3339(),
        "finished": Utc::now().to_rfc3339(),
        "engine_version": env!("CARGO_PKG_VERSION"),
        "os": report.knowledge_base.os,
        "fqdn": report.knowledge_base.fqdn,
        "requested": report.requested,
        "completed": report.completed,
        "failed": report.failed,
        "skipped": report.skipped,
        "called_fallbacks": report.called_fallbacks,
        "promoted_dependencies": report.promoted_dependencies,
        "failure_count": report.failure_count,
        "complete": report.is_complete(),
        "result_count": results.len(),
        "results": result_counts,
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize collection summary")
}
