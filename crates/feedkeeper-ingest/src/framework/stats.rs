//! Run statistics and per-target outcomes

use crate::framework::store::WriteOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Counters collected while ingesting
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct IngestStats {
    /// Records handled, whatever happened to them
    pub total_records: i64,
    pub records_inserted: i64,
    pub records_updated: i64,
    /// Dependent items the API no longer has
    pub records_skipped: i64,
    /// Records dropped by normalization or rejected by the store
    pub records_failed: i64,
    pub pages_fetched: i64,
    /// New connection rows
    pub connections_added: i64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => self.inc_inserted(),
            WriteOutcome::Updated => self.inc_updated(),
        }
    }

    pub fn inc_inserted(&mut self) {
        self.records_inserted += 1;
        self.total_records += 1;
    }

    pub fn inc_updated(&mut self) {
        self.records_updated += 1;
        self.total_records += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.records_skipped += 1;
        self.total_records += 1;
    }

    pub fn inc_failed(&mut self) {
        self.records_failed += 1;
        self.total_records += 1;
    }

    pub fn inc_pages(&mut self) {
        self.pages_fetched += 1;
    }

    pub fn add_connections(&mut self, added: u64) {
        self.connections_added += added as i64;
    }

    pub fn records_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total_records as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Fold counters of `other` into `self`. Durations are not summed since
    /// targets run concurrently; call [`IngestStats::complete`] afterwards.
    pub fn merge(self, other: Self) -> Self {
        Self {
            total_records: self.total_records + other.total_records,
            records_inserted: self.records_inserted + other.records_inserted,
            records_updated: self.records_updated + other.records_updated,
            records_skipped: self.records_skipped + other.records_skipped,
            records_failed: self.records_failed + other.records_failed,
            pages_fetched: self.pages_fetched + other.pages_fetched,
            connections_added: self.connections_added + other.connections_added,
            duration_secs: self.duration_secs,
            started_at: self.started_at.or(other.started_at),
            completed_at: other.completed_at.or(self.completed_at),
        }
    }
}

/// How a single target ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Done,
    /// Finished in an earlier run, nothing fetched
    Skipped,
    Failed,
    Cancelled,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Done => "done",
            TargetStatus::Skipped => "skipped",
            TargetStatus::Failed => "failed",
            TargetStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target_key: String,
    pub status: TargetStatus,
    pub error: Option<String>,
    pub stats: IngestStats,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub targets: Vec<TargetOutcome>,
    pub stats: IngestStats,
    /// Set when an authorization failure stopped the run
    pub auth_failure: Option<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(TargetStatus::Failed) > 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = IngestStats::new();
        stats.record(WriteOutcome::Inserted);
        stats.record(WriteOutcome::Updated);
        stats.inc_failed();
        stats.inc_pages();
        stats.add_connections(3);

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.records_inserted, 1);
        assert_eq!(stats.records_updated, 1);
        assert_eq!(stats.records_failed, 1);
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(stats.connections_added, 3);
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut a = IngestStats::new();
        a.inc_inserted();
        let mut b = IngestStats::default();
        b.inc_updated();
        b.inc_skipped();

        let merged = a.clone().merge(b);
        assert_eq!(merged.total_records, 3);
        assert_eq!(merged.records_skipped, 1);
        assert_eq!(merged.started_at, a.started_at);
    }

    #[test]
    fn test_report_counts_by_status() {
        let outcome = |status| TargetOutcome {
            target_key: "post:1".to_string(),
            status,
            error: None,
            stats: IngestStats::default(),
        };
        let report = RunReport {
            run_id: "r".to_string(),
            targets: vec![outcome(TargetStatus::Done), outcome(TargetStatus::Failed)],
            stats: IngestStats::default(),
            auth_failure: None,
            cancelled: false,
        };
        assert_eq!(report.count(TargetStatus::Done), 1);
        assert!(report.has_failures());
    }
}
