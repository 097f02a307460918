//! Resume ledger
//!
//! Two relations back this:
//! - `connections`: which record ids were seen under (parent, collection)
//! - `ingest_progress`: per (target, collection) status, cursor and counters
//!
//! A page is checkpointed only after every record on it (and its nested
//! work) was handled, so a saved cursor always points at the first page that
//! still needs fetching.

use crate::error::Result;
use crate::framework::store::{LedgerReset, ProgressEntry, ProgressStatus, RecordStore, ResetScope};
use crate::framework::types::{Collection, Cursor};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Position inside a collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Cursor of the next page to fetch, `None` at the start
    pub cursor: Option<Cursor>,
    /// Records fetched so far
    pub fetched: i64,
    /// Pages completed so far
    pub pages: i64,
}

/// Where a collection stands before (re)starting it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePoint {
    /// `None` when the collection was never started
    pub status: Option<ProgressStatus>,
    pub checkpoint: Checkpoint,
    pub last_error: Option<String>,
}

impl ResumePoint {
    pub fn is_done(&self) -> bool {
        self.status == Some(ProgressStatus::Done)
    }

    pub fn is_fresh(&self) -> bool {
        self.status.is_none()
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn RecordStore>,
    run_id: String,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn RecordStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// True once the collection has been walked to completion
    pub async fn has_processed(&self, target_key: &str, collection: Collection) -> Result<bool> {
        Ok(self.resume_point(target_key, collection).await?.is_done())
    }

    /// Record one membership. Returns false if it was already there.
    pub async fn mark_processed(&self, id: i64, parent_id: &str, collection: Collection) -> Result<bool> {
        let inserted = self.store.insert_connections(parent_id, collection, &[id]).await?;
        Ok(inserted > 0)
    }

    /// Record the memberships of a whole page, returning how many were new
    pub async fn mark_page(&self, parent_id: &str, collection: Collection, ids: &[i64]) -> Result<u64> {
        self.store.insert_connections(parent_id, collection, ids).await
    }

    pub async fn last_cursor(&self, target_key: &str, collection: Collection) -> Result<Option<Cursor>> {
        Ok(self.resume_point(target_key, collection).await?.checkpoint.cursor)
    }

    pub async fn resume_point(&self, target_key: &str, collection: Collection) -> Result<ResumePoint> {
        let entry = self.store.load_progress(target_key, collection).await?;
        Ok(match entry {
            Some(entry) => ResumePoint {
                status: Some(entry.status),
                checkpoint: Checkpoint {
                    cursor: entry.cursor.map(Cursor::from),
                    fetched: entry.fetched,
                    pages: entry.pages,
                },
                last_error: entry.last_error,
            },
            None => ResumePoint::default(),
        })
    }

    /// Persist the position after a fully handled page
    pub async fn save_cursor(&self, target_key: &str, collection: Collection, checkpoint: &Checkpoint) -> Result<()> {
        debug!(
            target_key,
            collection = %collection,
            cursor = ?checkpoint.cursor,
            fetched = checkpoint.fetched,
            "Checkpoint"
        );
        self.save(target_key, collection, ProgressStatus::Fetching, checkpoint, None)
            .await
    }

    /// Mark the collection done and clear its cursor
    pub async fn complete(&self, target_key: &str, collection: Collection, checkpoint: &Checkpoint) -> Result<()> {
        let done = Checkpoint {
            cursor: None,
            ..checkpoint.clone()
        };
        self.save(target_key, collection, ProgressStatus::Done, &done, None)
            .await
    }

    /// Mark the collection failed, keeping the cursor so a later run resumes
    /// at the page that failed
    pub async fn fail(
        &self,
        target_key: &str,
        collection: Collection,
        checkpoint: &Checkpoint,
        error: &str,
    ) -> Result<()> {
        self.save(target_key, collection, ProgressStatus::Failed, checkpoint, Some(error))
            .await
    }

    /// Forget everything recorded for a target so the next run starts over.
    ///
    /// Nested work goes too: the comment collections of every post the
    /// target reached (the target itself when it is a post) and the reply
    /// collections of their comments. Members are read before anything is
    /// deleted.
    pub async fn restart(&self, target_key: &str) -> Result<LedgerReset> {
        let mut posts = vec![target_key.to_string()];
        for collection in Collection::POST_FEEDS {
            let ids = self.store.connection_ids(target_key, collection).await?;
            posts.extend(ids.iter().map(i64::to_string));
        }

        let mut comments = Vec::new();
        for post in &posts {
            comments.extend(self.store.connection_ids(post, Collection::Comments).await?);
        }

        let mut scopes = vec![ResetScope::Target(target_key.to_string())];
        scopes.extend(posts.into_iter().skip(1).map(|post| ResetScope::Collection {
            collection: Collection::Comments,
            parent_id: Some(post),
        }));
        scopes.extend(comments.into_iter().map(|comment| ResetScope::Collection {
            collection: Collection::Replies,
            parent_id: Some(comment.to_string()),
        }));

        let mut removed = LedgerReset::default();
        for scope in &scopes {
            let reset = self.store.reset(scope).await?;
            removed.connections += reset.connections;
            removed.progress += reset.progress;
        }
        debug!(
            target_key,
            scopes = scopes.len(),
            connections = removed.connections,
            progress = removed.progress,
            "Ledger cleared"
        );
        Ok(removed)
    }

    async fn save(
        &self,
        target_key: &str,
        collection: Collection,
        status: ProgressStatus,
        checkpoint: &Checkpoint,
        error: Option<&str>,
    ) -> Result<()> {
        let entry = ProgressEntry {
            target_key: target_key.to_string(),
            collection: collection.as_str().to_string(),
            status,
            cursor: checkpoint.cursor.as_ref().map(|c| c.as_str().to_string()),
            fetched: checkpoint.fetched,
            pages: checkpoint.pages,
            last_error: error.map(str::to_string),
            run_id: Some(self.run_id.clone()),
            updated_at: Utc::now(),
        };
        self.store.save_progress(&entry).await
    }
}
