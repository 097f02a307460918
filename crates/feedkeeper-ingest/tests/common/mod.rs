//! Common test utilities for pipeline integration tests
//!
//! [`FakeSource`] is a scripted [`RemoteSource`]: items and pages are keyed
//! by the same API paths the HTTP client uses, every call is logged, and
//! failures can be injected per path.

#![allow(dead_code)]

use async_trait::async_trait;
use feedkeeper_ingest::api::endpoints::{collection_path, item_path};
use feedkeeper_ingest::error::{IngestError, Result};
use feedkeeper_ingest::framework::{
    CollectionRequest, Cursor, FetchParams, Orchestrator, RawPage, RefreshStatus, RemoteSource, Resource,
    RetryPolicy, RunOptions,
};
use feedkeeper_ingest::storage::SqliteStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure injected for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Auth,
    Api,
    Transient,
}

impl Failure {
    fn to_error(self, path: &str) -> IngestError {
        match self {
            Failure::Auth => IngestError::auth(format!("401 on {}", path)),
            Failure::Api => IngestError::api(format!("unexpected answer for {}", path)),
            Failure::Transient => IngestError::transient(format!("503 on {}", path)),
        }
    }
}

type PageKey = (String, Option<String>);

#[derive(Default)]
pub struct FakeSource {
    items: Mutex<HashMap<String, Value>>,
    pages: Mutex<HashMap<PageKey, RawPage>>,
    failures: Mutex<HashMap<String, Failure>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(self, resource: &Resource, value: Value) -> Self {
        lock(&self.items).insert(item_path(resource), value);
        self
    }

    /// Register the page served for `cursor` (`None` = first page)
    pub fn page(self, request: &CollectionRequest, cursor: Option<&str>, items: Vec<Value>, next: Option<&str>) -> Self {
        let page = RawPage {
            items,
            next_cursor: next.map(Cursor::new),
        };
        lock(&self.pages).insert((collection_path(request), cursor.map(str::to_string)), page);
        self
    }

    /// Fail every call on `key`: an item path, or `path@cursor` for a page
    /// (`path@` for the first page)
    pub fn fail(&self, key: &str, failure: Failure) {
        lock(&self.failures).insert(key.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Every call so far: `item:<path>`, `page:<path>@<cursor>`,
    /// `refresh:<path>`, `status:<path>`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn count_calls(&self, call: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == call).count()
    }

    fn log(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn check(&self, key: &str) -> Result<()> {
        match lock(&self.failures).get(key) {
            Some(failure) => Err(failure.to_error(key)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn fetch_item(&self, resource: &Resource, _params: &FetchParams) -> Result<Option<Value>> {
        let path = item_path(resource);
        self.log(format!("item:{}", path));
        self.check(&path)?;
        Ok(lock(&self.items).get(&path).cloned())
    }

    async fn fetch_page(
        &self,
        request: &CollectionRequest,
        _params: &FetchParams,
        cursor: Option<&Cursor>,
    ) -> Result<RawPage> {
        let path = collection_path(request);
        let cursor = cursor.map(|c| c.as_str().to_string());
        let key = format!("{}@{}", path, cursor.as_deref().unwrap_or(""));
        self.log(format!("page:{}", key));
        self.check(&key)?;
        Ok(lock(&self.pages).get(&(path, cursor)).cloned().unwrap_or_default())
    }

    async fn request_refresh(&self, resource: &Resource, _params: &FetchParams) -> Result<()> {
        self.log(format!("refresh:{}", item_path(resource)));
        Ok(())
    }

    async fn refresh_status(&self, resource: &Resource, _params: &FetchParams) -> Result<RefreshStatus> {
        self.log(format!("status:{}", item_path(resource)));
        Ok(RefreshStatus::Finished)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn post(id: i64, comments_count: i64) -> Value {
    json!({
        "id": id.to_string(),
        "created_time": "2024-03-01T10:00:00",
        "text": format!("post {}", id),
        "comments_count": comments_count,
        "reactions_like_count": 3,
    })
}

pub fn owned_post(id: i64, owner_id: i64) -> Value {
    json!({
        "id": id.to_string(),
        "text": format!("post {}", id),
        "comments_count": 0,
        "owner_id": owner_id.to_string(),
    })
}

pub fn comment(id: i64, replies_count: i64) -> Value {
    json!({
        "id": id.to_string(),
        "text": format!("comment {}", id),
        "replies_count": replies_count,
    })
}

pub fn profile(id: i64, username: &str) -> Value {
    json!({
        "id": id.to_string(),
        "username": username,
        "full_name": username.to_uppercase(),
        "followers_count": 10,
    })
}

/// Options with network niceties off: no refresh, no owner profiles
pub fn quiet_options() -> RunOptions {
    RunOptions {
        refresh: false,
        owner_profiles: false,
        concurrency: 1,
        ..Default::default()
    }
}

pub async fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().await.expect("in-memory store"))
}

pub fn orchestrator(source: &Arc<FakeSource>, store: &Arc<SqliteStore>, options: RunOptions) -> Orchestrator {
    Orchestrator::new(source.clone(), store.clone(), options).with_retry(RetryPolicy::immediate(2))
}

pub async fn count_rows(store: &SqliteStore, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(store.pool())
        .await
        .expect("count query")
}
