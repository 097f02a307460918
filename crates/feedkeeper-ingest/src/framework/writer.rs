//! Upsert writer
//!
//! Thin layer over [`RecordStore::upsert`] that bounds every write by the
//! store timeout.

use crate::error::{IngestError, Result};
use crate::framework::store::{RecordStore, WriteOutcome};
use crate::normalize::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct UpsertWriter {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Insert `row` or replace the existing row with the same key
    pub async fn write(&self, row: &Row) -> Result<WriteOutcome> {
        let outcome = tokio::time::timeout(self.timeout, self.store.upsert(row))
            .await
            .map_err(|_| {
                IngestError::storage(
                    row.table(),
                    format!("write of {} timed out after {:?}", row.key(), self.timeout),
                )
            })??;

        trace!(table = row.table(), key = %row.key(), ?outcome, "Upserted row");
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::store::{LedgerReset, ProgressEntry, ResetScope};
    use crate::framework::types::Collection;
    use crate::normalize::ProfileRow;
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use chrono::Utc;

    fn profile(id: i64, username: &str) -> Row {
        Row::Profile(ProfileRow {
            id,
            username: Some(username.to_string()),
            full_name: None,
            profile_type: None,
            biography: None,
            profile_url: None,
            avatar_url: None,
            is_verified: None,
            categories: vec![],
            workplaces: vec![],
            education: vec![],
            languages: vec![],
            current_city: vec![],
            hometown: vec![],
            likes_count: None,
            friends_count: None,
            followers_count: None,
            members_count: None,
            last_post_created_time: None,
            fetched_at: Utc::now(),
        })
    }

    /// Never finishes a write
    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn upsert(&self, _: &Row) -> Result<WriteOutcome> {
            std::future::pending().await
        }

        async fn insert_connections(&self, _: &str, _: Collection, _: &[i64]) -> Result<u64> {
            Ok(0)
        }

        async fn has_connection(&self, _: i64, _: &str, _: Collection) -> Result<bool> {
            Ok(false)
        }

        async fn count_connections(&self, _: &str, _: Collection) -> Result<i64> {
            Ok(0)
        }

        async fn connection_ids(&self, _: &str, _: Collection) -> Result<Vec<i64>> {
            Ok(vec![])
        }

        async fn load_progress(&self, _: &str, _: Collection) -> Result<Option<ProgressEntry>> {
            Ok(None)
        }

        async fn save_progress(&self, _: &ProgressEntry) -> Result<()> {
            Ok(())
        }

        async fn list_progress(&self) -> Result<Vec<ProgressEntry>> {
            Ok(vec![])
        }

        async fn reset(&self, _: &ResetScope) -> Result<LedgerReset> {
            Ok(LedgerReset::default())
        }

        async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let writer = UpsertWriter::new(store.clone(), Duration::from_secs(5));

        assert_eq!(writer.write(&profile(5, "old")).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(writer.write(&profile(5, "new")).await.unwrap(), WriteOutcome::Updated);

        let username: String = sqlx::query_scalar("SELECT username FROM profiles WHERE id = 5")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(username, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_times_out_as_storage_error() {
        let writer = UpsertWriter::new(Arc::new(StalledStore), Duration::from_secs(1));

        let err = writer.write(&profile(5, "x")).await.unwrap_err();
        match err {
            IngestError::Storage { table, message } => {
                assert_eq!(table, "profiles");
                assert!(message.contains("timed out"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
