//! JSON report artifact for a finished batch

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::scoring::{CategoryCounts, RankedProxy};
use crate::services::analytics::AnalyticsSnapshot;
use crate::services::batch::{BatchReport, RejectedInput};
use crate::sources::SourceStat;

/// Countries listed in the report's analytics section
pub const TOP_COUNTRIES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub cancelled: bool,
    pub checked: usize,
    /// Live proxies, best first
    pub proxies: Vec<RankedProxy>,
    pub categories: CategoryCounts,
    pub analytics: AnalyticsSnapshot,
    pub rejected: Vec<RejectedInput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceStat>,
}

impl RunReport {
    pub fn new(batch: BatchReport, analytics: AnalyticsSnapshot, sources: Vec<SourceStat>) -> Self {
        Self {
            run_id: batch.run_id,
            generated_at: Utc::now(),
            cancelled: batch.cancelled,
            checked: batch.results.len(),
            proxies: batch.ranked,
            categories: batch.categories,
            analytics,
            rejected: batch.rejected,
            sources,
        }
    }
}

/// Write `report` as pretty JSON, replacing `path` atomically
pub async fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let body = serde_json::to_vec_pretty(report)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;

    info!(
        path = %path.display(),
        proxies = report.proxies.len(),
        "Report written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analytics::AnalyticsAggregator;

    fn empty_batch() -> BatchReport {
        BatchReport {
            run_id: Uuid::new_v4(),
            results: Vec::new(),
            rejected: vec![RejectedInput {
                raw: "bogus".into(),
                kind: crate::error::ErrorKind::MalformedInput,
                reason: "missing port".into(),
            }],
            cancelled: false,
            ranked: Vec::new(),
            categories: CategoryCounts::default(),
        }
    }

    #[tokio::test]
    async fn test_write_report_round_trips_as_json() {
        let dir = std::env::temp_dir().join(format!("sift-report-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("report.json");

        let report = RunReport::new(
            empty_batch(),
            AnalyticsAggregator::new().snapshot(TOP_COUNTRIES),
            Vec::new(),
        );
        write_report(&path, &report).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["rejected"][0]["kind"], "malformed_input");
        assert_eq!(value["analytics"]["total_checked"], 0);
        assert!(value.get("sources").is_none());
        assert!(!dir.join("report.json.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
