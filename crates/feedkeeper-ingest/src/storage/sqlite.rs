//! SQLite backend
//!
//! Array columns are stored as JSON text. SQLite has no cheap way to tell an
//! insert from an update in `ON CONFLICT`, so each upsert checks for the key
//! inside the same transaction first.

use super::{
    upsert_sql, COMMENT_COLUMNS, POST_COLUMNS, PROFILE_COLUMNS, PROGRESS_COLUMNS, SEARCH_COLUMNS,
};
use crate::error::{IngestError, Result};
use crate::framework::store::{LedgerReset, ProgressEntry, RecordStore, ResetScope, WriteOutcome};
use crate::framework::types::Collection;
use crate::normalize::{
    CommentRow, PostRow, ProfileRow, Row, SearchRow, DATA_TABLES, TABLE_COMMENTS, TABLE_CONNECTIONS,
    TABLE_POSTS, TABLE_PROFILES, TABLE_SEARCHES,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::types::Json;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

const BUSY_TIMEOUT_SECS: u64 = 5;

const PROGRESS_SELECT: &str = "SELECT target_key, collection, status, cursor, fetched, pages, \
                               last_error, run_id, updated_at FROM ingest_progress";

fn placeholder(n: usize) -> String {
    format!("?{n}")
}

struct Statements {
    posts: String,
    comments: String,
    profiles: String,
    searches: String,
    progress: String,
}

impl Statements {
    fn new() -> Self {
        Self {
            posts: upsert_sql(TABLE_POSTS, POST_COLUMNS, &["id"], placeholder),
            comments: upsert_sql(TABLE_COMMENTS, COMMENT_COLUMNS, &["id"], placeholder),
            profiles: upsert_sql(TABLE_PROFILES, PROFILE_COLUMNS, &["id"], placeholder),
            searches: upsert_sql(TABLE_SEARCHES, SEARCH_COLUMNS, &["id"], placeholder),
            progress: upsert_sql(
                "ingest_progress",
                PROGRESS_COLUMNS,
                &["target_key", "collection"],
                placeholder,
            ),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    sql: Statements,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and run migrations.
    ///
    /// In-memory databases are pinned to a single connection that is never
    /// recycled; every pooled connection would otherwise see its own empty
    /// database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("../../migrations/sqlite").run(&pool).await?;

        debug!(in_memory, "SQLite store ready");
        Ok(Self {
            pool,
            sql: Statements::new(),
        })
    }

    /// Fresh private database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_row(&self, row: &Row) -> std::result::Result<WriteOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let exists_sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1", row.table());
        let exists = sqlx::query_scalar::<_, i64>(&exists_sql);
        let existing = match row {
            Row::Post(r) => exists.bind(r.id),
            Row::Comment(r) => exists.bind(r.id),
            Row::Profile(r) => exists.bind(r.id),
            Row::Search(r) => exists.bind(r.id.as_str()),
        }
        .fetch_one(&mut *tx)
        .await?;

        let query = match row {
            Row::Post(r) => bind_post(sqlx::query(&self.sql.posts), r),
            Row::Comment(r) => bind_comment(sqlx::query(&self.sql.comments), r),
            Row::Profile(r) => bind_profile(sqlx::query(&self.sql.profiles), r),
            Row::Search(r) => bind_search(sqlx::query(&self.sql.searches), r),
        };
        query.execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(if existing > 0 {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Inserted
        })
    }
}

fn bind_post<'q>(query: SqliteQuery<'q>, row: &'q PostRow) -> SqliteQuery<'q> {
    let att = row.attachment.columns();
    query
        .bind(row.id)
        .bind(row.created_time)
        .bind(row.text.as_deref())
        .bind(row.text_lang.as_deref())
        .bind(Json(&row.tagged.tags))
        .bind(Json(&row.tagged.tagged_user_ids))
        .bind(Json(&row.tagged.tagged_user_names))
        .bind(att.attachment_type)
        .bind(att.link_url)
        .bind(att.link_preview_url)
        .bind(att.video_url)
        .bind(att.video_preview_url)
        .bind(att.image_url)
        .bind(att.image_preview_url)
        .bind(att.medias_id.map(Json))
        .bind(att.medias_preview_url.map(Json))
        .bind(att.medias_preview_content.map(Json))
        .bind(row.attached_post_id)
        .bind(row.reactions.total)
        .bind(row.reactions.like)
        .bind(row.reactions.love)
        .bind(row.reactions.haha)
        .bind(row.reactions.wow)
        .bind(row.reactions.sad)
        .bind(row.reactions.angry)
        .bind(row.reactions.care)
        .bind(row.comments_count)
        .bind(row.shares_count)
        .bind(row.owner.id)
        .bind(row.owner.username.as_deref())
        .bind(row.owner.full_name.as_deref())
        .bind(row.group_id)
        .bind(row.fetched_at)
}

fn bind_comment<'q>(query: SqliteQuery<'q>, row: &'q CommentRow) -> SqliteQuery<'q> {
    query
        .bind(row.id)
        .bind(row.post_id)
        .bind(row.parent_comment_id)
        .bind(row.created_time)
        .bind(row.text.as_deref())
        .bind(row.text_lang.as_deref())
        .bind(Json(&row.tagged.tags))
        .bind(Json(&row.tagged.tagged_user_ids))
        .bind(Json(&row.tagged.tagged_user_names))
        .bind(row.reactions.total)
        .bind(row.reactions.like)
        .bind(row.reactions.love)
        .bind(row.reactions.haha)
        .bind(row.reactions.wow)
        .bind(row.reactions.sad)
        .bind(row.reactions.angry)
        .bind(row.reactions.care)
        .bind(row.replies_count)
        .bind(row.owner.id)
        .bind(row.owner.username.as_deref())
        .bind(row.owner.full_name.as_deref())
        .bind(row.fetched_at)
}

fn bind_profile<'q>(query: SqliteQuery<'q>, row: &'q ProfileRow) -> SqliteQuery<'q> {
    query
        .bind(row.id)
        .bind(row.username.as_deref())
        .bind(row.full_name.as_deref())
        .bind(row.profile_type.as_deref())
        .bind(row.biography.as_deref())
        .bind(row.profile_url.as_deref())
        .bind(row.avatar_url.as_deref())
        .bind(row.is_verified)
        .bind(Json(&row.categories))
        .bind(Json(&row.workplaces))
        .bind(Json(&row.education))
        .bind(Json(&row.languages))
        .bind(Json(&row.current_city))
        .bind(Json(&row.hometown))
        .bind(row.likes_count)
        .bind(row.friends_count)
        .bind(row.followers_count)
        .bind(row.members_count)
        .bind(row.last_post_created_time)
        .bind(row.fetched_at)
}

fn bind_search<'q>(query: SqliteQuery<'q>, row: &'q SearchRow) -> SqliteQuery<'q> {
    query
        .bind(row.id.as_str())
        .bind(row.request.as_str())
        .bind(row.search_type.as_str())
        .bind(row.location_id)
        .bind(row.author_id)
        .bind(row.from_date)
        .bind(row.to_date)
        .bind(row.fetched_at)
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert(&self, row: &Row) -> Result<WriteOutcome> {
        self.write_row(row)
            .await
            .map_err(|e| IngestError::storage(row.table(), e.to_string()))
    }

    async fn insert_connections(&self, parent_id: &str, collection: Collection, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let fetched_at = Utc::now();
        let mut inserted = 0;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::storage(TABLE_CONNECTIONS, e.to_string()))?;

        for id in ids {
            let result = sqlx::query(
                "INSERT INTO connections (id, parent_id, collection, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
            )
            .bind(*id)
            .bind(parent_id)
            .bind(collection.as_str())
            .bind(fetched_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| IngestError::storage(TABLE_CONNECTIONS, e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::storage(TABLE_CONNECTIONS, e.to_string()))?;
        Ok(inserted)
    }

    async fn has_connection(&self, id: i64, parent_id: &str, collection: Collection) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM connections WHERE id = ?1 AND parent_id = ?2 AND collection = ?3",
        )
        .bind(id)
        .bind(parent_id)
        .bind(collection.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count_connections(&self, parent_id: &str, collection: Collection) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM connections WHERE parent_id = ?1 AND collection = ?2")
            .bind(parent_id)
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn connection_ids(&self, parent_id: &str, collection: Collection) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM connections WHERE parent_id = ?1 AND collection = ?2 ORDER BY id")
            .bind(parent_id)
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn load_progress(&self, target_key: &str, collection: Collection) -> Result<Option<ProgressEntry>> {
        let sql = format!("{PROGRESS_SELECT} WHERE target_key = ?1 AND collection = ?2");
        let entry = sqlx::query_as::<_, ProgressEntry>(&sql)
            .bind(target_key)
            .bind(collection.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn save_progress(&self, entry: &ProgressEntry) -> Result<()> {
        sqlx::query(&self.sql.progress)
            .bind(entry.target_key.as_str())
            .bind(entry.collection.as_str())
            .bind(entry.status.as_str())
            .bind(entry.cursor.as_deref())
            .bind(entry.fetched)
            .bind(entry.pages)
            .bind(entry.last_error.as_deref())
            .bind(entry.run_id.as_deref())
            .bind(entry.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| IngestError::storage("ingest_progress", e.to_string()))?;
        Ok(())
    }

    async fn list_progress(&self) -> Result<Vec<ProgressEntry>> {
        let sql = format!("{PROGRESS_SELECT} ORDER BY updated_at DESC, target_key, collection");
        let entries = sqlx::query_as::<_, ProgressEntry>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn reset(&self, scope: &ResetScope) -> Result<LedgerReset> {
        let mut tx = self.pool.begin().await?;

        let (connections, progress) = match scope {
            ResetScope::All => {
                let c = sqlx::query("DELETE FROM connections").execute(&mut *tx).await?;
                let p = sqlx::query("DELETE FROM ingest_progress").execute(&mut *tx).await?;
                (c, p)
            },
            ResetScope::Collection {
                collection,
                parent_id: None,
            } => {
                let c = sqlx::query("DELETE FROM connections WHERE collection = ?1")
                    .bind(collection.as_str())
                    .execute(&mut *tx)
                    .await?;
                let p = sqlx::query("DELETE FROM ingest_progress WHERE collection = ?1")
                    .bind(collection.as_str())
                    .execute(&mut *tx)
                    .await?;
                (c, p)
            },
            ResetScope::Collection {
                collection,
                parent_id: Some(parent),
            } => {
                let c = sqlx::query("DELETE FROM connections WHERE collection = ?1 AND parent_id = ?2")
                    .bind(collection.as_str())
                    .bind(parent.as_str())
                    .execute(&mut *tx)
                    .await?;
                let p = sqlx::query("DELETE FROM ingest_progress WHERE collection = ?1 AND target_key = ?2")
                    .bind(collection.as_str())
                    .bind(parent.as_str())
                    .execute(&mut *tx)
                    .await?;
                (c, p)
            },
            ResetScope::Target(key) => {
                let c = sqlx::query("DELETE FROM connections WHERE parent_id = ?1")
                    .bind(key.as_str())
                    .execute(&mut *tx)
                    .await?;
                let p = sqlx::query("DELETE FROM ingest_progress WHERE target_key = ?1")
                    .bind(key.as_str())
                    .execute(&mut *tx)
                    .await?;
                (c, p)
            },
        };

        tx.commit().await?;
        Ok(LedgerReset {
            connections: connections.rows_affected(),
            progress: progress.rows_affected(),
        })
    }

    async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut counts = Vec::with_capacity(DATA_TABLES.len());
        for table in DATA_TABLES {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push((table.to_string(), count));
        }
        Ok(counts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::store::ProgressStatus;
    use crate::normalize::{Attachment, OwnerSnapshot, Reactions, TaggedText};
    use sqlx::Row as _;

    fn post(id: i64, text: &str) -> PostRow {
        PostRow {
            id,
            created_time: None,
            text: Some(text.to_string()),
            text_lang: None,
            tagged: TaggedText {
                tags: vec!["#rust".to_string()],
                tagged_user_ids: vec![7],
                tagged_user_names: vec!["Ada".to_string()],
            },
            attachment: Attachment::Media {
                ids: vec![1, 2],
                preview_urls: vec![],
                preview_contents: vec![],
            },
            attached_post_id: None,
            reactions: Reactions {
                total: 3,
                like: 3,
                ..Default::default()
            },
            comments_count: Some(0),
            shares_count: None,
            owner: OwnerSnapshot::default(),
            group_id: None,
            fetched_at: Utc::now(),
        }
    }

    fn entry(target: &str, collection: Collection, status: ProgressStatus) -> ProgressEntry {
        ProgressEntry {
            target_key: target.to_string(),
            collection: collection.as_str().to_string(),
            status,
            cursor: Some("c1".to_string()),
            fetched: 10,
            pages: 1,
            last_error: None,
            run_id: Some("run-1".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_insert_then_update_and_replaces_row() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store.upsert(&Row::Post(post(42, "first"))).await.unwrap();
        assert_eq!(first, WriteOutcome::Inserted);

        let second = store.upsert(&Row::Post(post(42, "second"))).await.unwrap();
        assert_eq!(second, WriteOutcome::Updated);

        let row = sqlx::query("SELECT text, text_tags, attachment_type, attached_medias_id FROM posts WHERE id = 42")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("text"), "second");
        assert_eq!(row.get::<String, _>("text_tags"), r##"["#rust"]"##);
        assert_eq!(row.get::<String, _>("attachment_type"), "media");
        assert_eq!(row.get::<String, _>("attached_medias_id"), "[1,2]");

        let counts = store.table_counts().await.unwrap();
        assert!(counts.contains(&("posts".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_connections_are_deduplicated() {
        let store = SqliteStore::in_memory().await.unwrap();

        let new = store.insert_connections("9", Collection::Comments, &[1, 2, 3]).await.unwrap();
        assert_eq!(new, 3);
        let again = store.insert_connections("9", Collection::Comments, &[3, 4]).await.unwrap();
        assert_eq!(again, 1);

        assert_eq!(store.count_connections("9", Collection::Comments).await.unwrap(), 4);
        assert!(store.has_connection(4, "9", Collection::Comments).await.unwrap());
        assert!(!store.has_connection(4, "9", Collection::Replies).await.unwrap());
    }

    #[tokio::test]
    async fn test_progress_roundtrip_and_overwrite() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(store.load_progress("9", Collection::Comments).await.unwrap().is_none());

        let mut saved = entry("9", Collection::Comments, ProgressStatus::Fetching);
        store.save_progress(&saved).await.unwrap();

        saved.status = ProgressStatus::Done;
        saved.cursor = None;
        store.save_progress(&saved).await.unwrap();

        let loaded = store.load_progress("9", Collection::Comments).await.unwrap().unwrap();
        assert_eq!(loaded.status, ProgressStatus::Done);
        assert_eq!(loaded.cursor, None);
        assert_eq!(loaded.fetched, 10);
        assert_eq!(store.list_progress().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_scopes() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_connections("9", Collection::Comments, &[1, 2]).await.unwrap();
        store.insert_connections("8", Collection::Comments, &[3]).await.unwrap();
        store.insert_connections("alice", Collection::FeedPosts, &[4]).await.unwrap();
        store
            .save_progress(&entry("9", Collection::Comments, ProgressStatus::Done))
            .await
            .unwrap();
        store
            .save_progress(&entry("alice", Collection::FeedPosts, ProgressStatus::Fetching))
            .await
            .unwrap();

        let removed = store
            .reset(&ResetScope::Collection {
                collection: Collection::Comments,
                parent_id: Some("9".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(removed, LedgerReset { connections: 2, progress: 1 });
        assert_eq!(store.count_connections("8", Collection::Comments).await.unwrap(), 1);

        let removed = store.reset(&ResetScope::Target("alice".to_string())).await.unwrap();
        assert_eq!(removed, LedgerReset { connections: 1, progress: 1 });

        let removed = store.reset(&ResetScope::All).await.unwrap();
        assert_eq!(removed.connections, 1);
        assert!(store.list_progress().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_rows_keyed_by_text_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let row = SearchRow {
            id: "rust///latest".to_string(),
            request: "rust".to_string(),
            search_type: "latest".to_string(),
            location_id: None,
            author_id: None,
            from_date: None,
            to_date: None,
            fetched_at: Utc::now(),
        };

        assert_eq!(store.upsert(&Row::Search(row.clone())).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.upsert(&Row::Search(row)).await.unwrap(), WriteOutcome::Updated);
    }
}
