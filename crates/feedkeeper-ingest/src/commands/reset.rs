//! `feedkeeper reset` command implementation

use crate::config::Config;
use crate::error::Result;
use crate::framework::store::{LedgerReset, RecordStore, ResetScope};
use crate::framework::types::Collection;
use crate::storage;
use tracing::info;

/// Ledger rows selected by the reset flags
pub fn scope(all: bool, collection: Option<Collection>, parent: Option<String>) -> ResetScope {
    match collection {
        Some(collection) if !all => ResetScope::Collection {
            collection,
            parent_id: parent,
        },
        _ => ResetScope::All,
    }
}

pub async fn run(config: &Config, scope: ResetScope) -> Result<LedgerReset> {
    let store = storage::connect(&config.database.url, config.database.max_connections).await?;
    let removed = reset(&*store, &scope).await?;
    println!(
        "Removed {} connection rows and {} progress rows.",
        removed.connections, removed.progress
    );
    Ok(removed)
}

async fn reset(store: &dyn RecordStore, scope: &ResetScope) -> Result<LedgerReset> {
    let removed = store.reset(scope).await?;
    info!(
        ?scope,
        connections = removed.connections,
        progress = removed.progress,
        "Ledger reset"
    );
    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[test]
    fn test_scope_from_flags() {
        assert_eq!(scope(true, None, None), ResetScope::All);
        assert_eq!(
            scope(false, Some(Collection::Replies), Some("9".to_string())),
            ResetScope::Collection {
                collection: Collection::Replies,
                parent_id: Some("9".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_reset_collection_keeps_others() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_connections("1", Collection::Comments, &[10, 11]).await.unwrap();
        store.insert_connections("1", Collection::FeedPosts, &[20]).await.unwrap();

        let removed = reset(
            &store,
            &ResetScope::Collection {
                collection: Collection::Comments,
                parent_id: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(removed.connections, 2);
        assert_eq!(store.count_connections("1", Collection::Comments).await.unwrap(), 0);
        assert_eq!(store.count_connections("1", Collection::FeedPosts).await.unwrap(), 1);
    }
}
