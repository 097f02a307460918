//! Fetch capability consumed by the pipeline

use crate::error::Result;
use crate::framework::types::{CollectionRequest, Cursor, FetchParams, RawPage, RefreshStatus, Resource};
use async_trait::async_trait;
use serde_json::Value;

/// Remote API the pipeline pulls records from.
///
/// Implementations classify failures: [`IngestError::Transient`] for
/// anything worth retrying, [`IngestError::Auth`] for credential problems,
/// [`IngestError::Api`] for everything else. They do not retry themselves.
///
/// [`IngestError::Transient`]: crate::error::IngestError::Transient
/// [`IngestError::Auth`]: crate::error::IngestError::Auth
/// [`IngestError::Api`]: crate::error::IngestError::Api
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch a single item. `Ok(None)` when the platform reports it missing.
    async fn fetch_item(&self, resource: &Resource, params: &FetchParams) -> Result<Option<Value>>;

    /// Fetch one page of a collection, starting at `cursor` (or the start).
    async fn fetch_page(
        &self,
        request: &CollectionRequest,
        params: &FetchParams,
        cursor: Option<&Cursor>,
    ) -> Result<RawPage>;

    /// Ask the platform to re-collect a resource before it is read.
    async fn request_refresh(&self, resource: &Resource, params: &FetchParams) -> Result<()>;

    async fn refresh_status(&self, resource: &Resource, params: &FetchParams) -> Result<RefreshStatus>;
}
