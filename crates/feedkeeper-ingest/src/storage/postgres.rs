//! PostgreSQL backend
//!
//! Array columns are native `TEXT[]` / `BIGINT[]`. Upserts tell inserts from
//! updates with `RETURNING (xmax = 0)`.

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
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, Postgres};
use sqlx::query::QueryScalar;
use std::time::Duration;
use tracing::debug;

type PgUpsert<'q> = QueryScalar<'q, Postgres, bool, PgArguments>;

const ACQUIRE_TIMEOUT_SECS: u64 = 30;

const PROGRESS_SELECT: &str = "SELECT target_key, collection, status, cursor, fetched, pages, \
                               last_error, run_id, updated_at FROM ingest_progress";

fn placeholder(n: usize) -> String {
    format!("${n}")
}

fn returning_inserted(table: &str, columns: &[&str]) -> String {
    format!(
        "{} RETURNING (xmax = 0) AS inserted",
        upsert_sql(table, columns, &["id"], placeholder)
    )
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
            posts: returning_inserted(TABLE_POSTS, POST_COLUMNS),
            comments: returning_inserted(TABLE_COMMENTS, COMMENT_COLUMNS),
            profiles: returning_inserted(TABLE_PROFILES, PROFILE_COLUMNS),
            searches: returning_inserted(TABLE_SEARCHES, SEARCH_COLUMNS),
            progress: upsert_sql(
                "ingest_progress",
                PROGRESS_COLUMNS,
                &["target_key", "collection"],
                placeholder,
            ),
        }
    }
}

pub struct PgStore {
    pool: PgPool,
    sql: Statements,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(url)
            .await?;

        sqlx::migrate!("../../migrations/postgres").run(&pool).await?;

        debug!(max_connections, "PostgreSQL store ready");
        Ok(Self {
            pool,
            sql: Statements::new(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_post<'q>(query: PgUpsert<'q>, row: &'q PostRow) -> PgUpsert<'q> {
    let att = row.attachment.columns();
    query
        .bind(row.id)
        .bind(row.created_time)
        .bind(row.text.as_deref())
        .bind(row.text_lang.as_deref())
        .bind(&row.tagged.tags)
        .bind(&row.tagged.tagged_user_ids)
        .bind(&row.tagged.tagged_user_names)
        .bind(att.attachment_type)
        .bind(att.link_url)
        .bind(att.link_preview_url)
        .bind(att.video_url)
        .bind(att.video_preview_url)
        .bind(att.image_url)
        .bind(att.image_preview_url)
        .bind(att.medias_id)
        .bind(att.medias_preview_url)
        .bind(att.medias_preview_content)
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

fn bind_comment<'q>(query: PgUpsert<'q>, row: &'q CommentRow) -> PgUpsert<'q> {
    query
        .bind(row.id)
        .bind(row.post_id)
        .bind(row.parent_comment_id)
        .bind(row.created_time)
        .bind(row.text.as_deref())
        .bind(row.text_lang.as_deref())
        .bind(&row.tagged.tags)
        .bind(&row.tagged.tagged_user_ids)
        .bind(&row.tagged.tagged_user_names)
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

fn bind_profile<'q>(query: PgUpsert<'q>, row: &'q ProfileRow) -> PgUpsert<'q> {
    query
        .bind(row.id)
        .bind(row.username.as_deref())
        .bind(row.full_name.as_deref())
        .bind(row.profile_type.as_deref())
        .bind(row.biography.as_deref())
        .bind(row.profile_url.as_deref())
        .bind(row.avatar_url.as_deref())
        .bind(row.is_verified)
        .bind(&row.categories)
        .bind(&row.workplaces)
        .bind(&row.education)
        .bind(&row.languages)
        .bind(&row.current_city)
        .bind(&row.hometown)
        .bind(row.likes_count)
        .bind(row.friends_count)
        .bind(row.followers_count)
        .bind(row.members_count)
        .bind(row.last_post_created_time)
        .bind(row.fetched_at)
}

fn bind_search<'q>(query: PgUpsert<'q>, row: &'q SearchRow) -> PgUpsert<'q> {
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
impl RecordStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, row: &Row) -> Result<WriteOutcome> {
        let query = match row {
            Row::Post(r) => bind_post(sqlx::query_scalar(&self.sql.posts), r),
            Row::Comment(r) => bind_comment(sqlx::query_scalar(&self.sql.comments), r),
            Row::Profile(r) => bind_profile(sqlx::query_scalar(&self.sql.profiles), r),
            Row::Search(r) => bind_search(sqlx::query_scalar(&self.sql.searches), r),
        };

        let inserted = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::storage(row.table(), e.to_string()))?;

        Ok(if inserted {
            WriteOutcome::Inserted
        } else {
            WriteOutcome::Updated
        })
    }

    async fn insert_connections(&self, parent_id: &str, collection: Collection, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "INSERT INTO connections (id, parent_id, collection) \
             SELECT UNNEST($1::BIGINT[]), $2, $3 ON CONFLICT DO NOTHING",
        )
        .bind(ids)
        .bind(parent_id)
        .bind(collection.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::storage(TABLE_CONNECTIONS, e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn has_connection(&self, id: i64, parent_id: &str, collection: Collection) -> Result<bool> {
        let exists = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM connections WHERE id = $1 AND parent_id = $2 AND collection = $3)",
        )
        .bind(id)
        .bind(parent_id)
        .bind(collection.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn count_connections(&self, parent_id: &str, collection: Collection) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM connections WHERE parent_id = $1 AND collection = $2")
            .bind(parent_id)
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn connection_ids(&self, parent_id: &str, collection: Collection) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM connections WHERE parent_id = $1 AND collection = $2 ORDER BY id")
            .bind(parent_id)
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn load_progress(&self, target_key: &str, collection: Collection) -> Result<Option<ProgressEntry>> {
        let sql = format!("{PROGRESS_SELECT} WHERE target_key = $1 AND collection = $2");
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
        // (connections filter, progress filter, binds)
        let (connections_where, progress_where, binds): (&str, &str, Vec<&str>) = match scope {
            ResetScope::All => ("", "", vec![]),
            ResetScope::Collection {
                collection,
                parent_id: None,
            } => (
                " WHERE collection = $1",
                " WHERE collection = $1",
                vec![collection.as_str()],
            ),
            ResetScope::Collection {
                collection,
                parent_id: Some(parent),
            } => (
                " WHERE collection = $1 AND parent_id = $2",
                " WHERE collection = $1 AND target_key = $2",
                vec![collection.as_str(), parent.as_str()],
            ),
            ResetScope::Target(key) => (" WHERE parent_id = $1", " WHERE target_key = $1", vec![key.as_str()]),
        };

        let mut tx = self.pool.begin().await?;

        let connections_sql = format!("DELETE FROM connections{connections_where}");
        let mut query = sqlx::query(&connections_sql);
        for value in &binds {
            query = query.bind(*value);
        }
        let connections = query.execute(&mut *tx).await?.rows_affected();

        let progress_sql = format!("DELETE FROM ingest_progress{progress_where}");
        let mut query = sqlx::query(&progress_sql);
        for value in &binds {
            query = query.bind(*value);
        }
        let progress = query.execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        Ok(LedgerReset { connections, progress })
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
