//! Relational backends for [`RecordStore`]
//!
//! - `postgres://` / `postgresql://` URLs open a [`PgStore`] (native array
//!   columns)
//! - `sqlite:` URLs open a [`SqliteStore`] (JSON text array columns)
//!
//! Both run their embedded migrations on connect.

mod postgres;
mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use crate::error::{IngestError, Result};
use crate::framework::store::RecordStore;
use std::sync::Arc;
use tracing::info;

/// Backend selected by a database URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl DatabaseKind {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            _ => Err(IngestError::config(format!(
                "unsupported database URL scheme '{}' (expected postgres:// or sqlite:)",
                scheme
            ))),
        }
    }
}

/// Open the store for `url` and bring its schema up to date.
pub async fn connect(url: &str, max_connections: u32) -> Result<Arc<dyn RecordStore>> {
    let kind = DatabaseKind::from_url(url)?;
    let store: Arc<dyn RecordStore> = match kind {
        DatabaseKind::Postgres => Arc::new(PgStore::connect(url, max_connections).await?),
        DatabaseKind::Sqlite => Arc::new(SqliteStore::connect(url, max_connections).await?),
    };
    info!(backend = store.backend(), url = %redact(url), "Connected to store");
    Ok(store)
}

/// Hide the password of a connection URL for logging
pub fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        },
        _ => url.to_string(),
    }
}

pub(crate) const POST_COLUMNS: &[&str] = &[
    "id",
    "created_time",
    "text",
    "text_lang",
    "text_tags",
    "text_tagged_users",
    "text_tagged_user_names",
    "attachment_type",
    "attached_link_url",
    "attached_link_preview_url",
    "attached_video_url",
    "attached_video_preview_url",
    "attached_image_url",
    "attached_image_preview_url",
    "attached_medias_id",
    "attached_medias_preview_url",
    "attached_medias_preview_content",
    "attached_post_id",
    "reactions_total",
    "reactions_like",
    "reactions_love",
    "reactions_haha",
    "reactions_wow",
    "reactions_sad",
    "reactions_angry",
    "reactions_care",
    "comments_count",
    "shares_count",
    "owner_id",
    "owner_username",
    "owner_full_name",
    "group_id",
    "fetched_at",
];

pub(crate) const COMMENT_COLUMNS: &[&str] = &[
    "id",
    "post_id",
    "parent_comment_id",
    "created_time",
    "text",
    "text_lang",
    "text_tags",
    "text_tagged_users",
    "text_tagged_user_names",
    "reactions_total",
    "reactions_like",
    "reactions_love",
    "reactions_haha",
    "reactions_wow",
    "reactions_sad",
    "reactions_angry",
    "reactions_care",
    "replies_count",
    "owner_id",
    "owner_username",
    "owner_full_name",
    "fetched_at",
];

pub(crate) const PROFILE_COLUMNS: &[&str] = &[
    "id",
    "username",
    "full_name",
    "profile_type",
    "biography",
    "profile_url",
    "avatar_url",
    "is_verified",
    "categories",
    "workplaces",
    "education",
    "languages",
    "current_city",
    "hometown",
    "likes_count",
    "friends_count",
    "followers_count",
    "members_count",
    "last_post_created_time",
    "fetched_at",
];

pub(crate) const SEARCH_COLUMNS: &[&str] = &[
    "id",
    "request",
    "search_type",
    "location_id",
    "author_id",
    "from_date",
    "to_date",
    "fetched_at",
];

pub(crate) const PROGRESS_COLUMNS: &[&str] = &[
    "target_key",
    "collection",
    "status",
    "cursor",
    "fetched",
    "pages",
    "last_error",
    "run_id",
    "updated_at",
];

/// `INSERT .. ON CONFLICT (key) DO UPDATE SET` every non-key column.
///
/// `placeholder(n)` renders the n-th (1-based) bind parameter for the
/// backend.
pub(crate) fn upsert_sql(
    table: &str,
    columns: &[&str],
    key: &[&str],
    placeholder: fn(usize) -> String,
) -> String {
    let values: Vec<String> = (1..=columns.len()).map(placeholder).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !key.contains(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
        columns.join(", "),
        values.join(", "),
        key.join(", "),
        updates.join(", ")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_database_kind_from_url() {
        assert_eq!(
            DatabaseKind::from_url("postgres://u:p@localhost/db").unwrap(),
            DatabaseKind::Postgres
        );
        assert_eq!(
            DatabaseKind::from_url("postgresql://localhost/db").unwrap(),
            DatabaseKind::Postgres
        );
        assert_eq!(
            DatabaseKind::from_url("sqlite://feedkeeper.db").unwrap(),
            DatabaseKind::Sqlite
        );
        assert_eq!(DatabaseKind::from_url("sqlite::memory:").unwrap(), DatabaseKind::Sqlite);
        assert!(matches!(
            DatabaseKind::from_url("mysql://localhost/db"),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_upsert_sql_replaces_all_non_key_columns() {
        let sql = upsert_sql("searches", &["id", "request", "fetched_at"], &["id"], |n| format!("${n}"));
        assert_eq!(
            sql,
            "INSERT INTO searches (id, request, fetched_at) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET request = excluded.request, fetched_at = excluded.fetched_at"
        );
    }

    #[test]
    fn test_redact_hides_password() {
        assert_eq!(
            redact("postgres://ingest:secret@db:5432/feeds"),
            "postgres://ingest:***@db:5432/feeds"
        );
        assert_eq!(redact("sqlite://feedkeeper.db"), "sqlite://feedkeeper.db");
    }
}
