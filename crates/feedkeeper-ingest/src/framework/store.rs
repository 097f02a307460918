//! Store capability consumed by the pipeline
//!
//! Concrete backends live in [`crate::storage`].

use crate::error::Result;
use crate::framework::types::Collection;
use crate::normalize::Row;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
}

/// Lifecycle of one (target, collection) in the progress table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Fetching,
    Done,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Fetching => "fetching",
            ProgressStatus::Done => "done",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl From<String> for ProgressStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "done" => ProgressStatus::Done,
            "failed" => ProgressStatus::Failed,
            _ => ProgressStatus::Fetching,
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the progress side-table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ProgressEntry {
    pub target_key: String,
    pub collection: String,
    #[sqlx(try_from = "String")]
    pub status: ProgressStatus,
    pub cursor: Option<String>,
    pub fetched: i64,
    pub pages: i64,
    pub last_error: Option<String>,
    pub run_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Which ledger rows `reset` removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    All,
    Collection {
        collection: Collection,
        /// Restrict to one parent id (connections) / target key (progress)
        parent_id: Option<String>,
    },
    /// Everything recorded under one target key, all collections
    Target(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerReset {
    pub connections: u64,
    pub progress: u64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend name for logs ("postgres", "sqlite")
    fn backend(&self) -> &'static str;

    /// Insert the row, or replace every non-key column of the existing one.
    ///
    /// Errors are [`IngestError::Storage`] naming the table.
    ///
    /// [`IngestError::Storage`]: crate::error::IngestError::Storage
    async fn upsert(&self, row: &Row) -> Result<WriteOutcome>;

    /// Record membership of `ids` under (`parent_id`, `collection`).
    /// Existing memberships are left alone. Returns how many were new.
    async fn insert_connections(&self, parent_id: &str, collection: Collection, ids: &[i64]) -> Result<u64>;

    async fn has_connection(&self, id: i64, parent_id: &str, collection: Collection) -> Result<bool>;

    async fn count_connections(&self, parent_id: &str, collection: Collection) -> Result<i64>;

    /// Ids recorded under (`parent_id`, `collection`), ascending
    async fn connection_ids(&self, parent_id: &str, collection: Collection) -> Result<Vec<i64>>;

    async fn load_progress(&self, target_key: &str, collection: Collection) -> Result<Option<ProgressEntry>>;

    async fn save_progress(&self, entry: &ProgressEntry) -> Result<()>;

    /// Every progress row, most recently updated first
    async fn list_progress(&self) -> Result<Vec<ProgressEntry>>;

    async fn reset(&self, scope: &ResetScope) -> Result<LedgerReset>;

    /// Row count of each destination table
    async fn table_counts(&self) -> Result<Vec<(String, i64)>>;
}
