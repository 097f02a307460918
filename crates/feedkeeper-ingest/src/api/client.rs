//! HTTP client for the data365 API
//!
//! Implements [`RemoteSource`]. Every request carries the `access_token`
//! query parameter; failures are classified, never retried here:
//!
//! - 401 / 403 → [`IngestError::Auth`]
//! - 429, 5xx, timeouts, connection errors → [`IngestError::Transient`]
//! - anything else unexpected → [`IngestError::Api`]

use crate::api::endpoints;
use crate::api::types::{ApiEnvelope, PageData, UpdateData, STATUS_ACCEPTED, STATUS_OK};
use crate::error::{IngestError, Result};
use crate::framework::source::RemoteSource;
use crate::framework::types::{CollectionRequest, Cursor, FetchParams, RawPage, RefreshStatus, Resource};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single API request in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default versioned API root
pub const DEFAULT_API_URL: &str = "https://api.data365.co/v1.1";

/// Collections are always read newest first
const ORDER_BY: &str = "date_desc";

/// Longest response body excerpt quoted in errors
const BODY_EXCERPT_CHARS: usize = 200;

pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str, query: &[(&str, String)]) -> Result<ApiEnvelope> {
        let url = endpoints::url(&self.base_url, path);

        let response = self
            .client
            .request(method.clone(), &url)
            .query(query)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(method = %method, path, status = status.as_u16(), "API request");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::auth(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                path,
                excerpt(&body)
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(IngestError::transient(format!("HTTP {} from {}", status.as_u16(), path)));
        }

        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| {
            IngestError::api(format!(
                "unreadable response from {} (HTTP {}): {}: {}",
                path,
                status.as_u16(),
                e,
                excerpt(&body)
            ))
        })
    }
}

/// Strip the URL (it carries the token) and classify a transport failure
fn transport_error(e: reqwest::Error) -> IngestError {
    let retryable = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
    let e = e.without_url();
    if retryable {
        IngestError::transient(e.to_string())
    } else {
        IngestError::api(e.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

#[async_trait]
impl RemoteSource for ApiClient {
    async fn fetch_item(&self, resource: &Resource, params: &FetchParams) -> Result<Option<Value>> {
        let path = endpoints::item_path(resource);
        let envelope = self.request(Method::GET, &path, &params.query_pairs()).await?;

        if envelope.is_not_found() {
            debug!(resource = %resource, "Item not found");
            return Ok(None);
        }
        if envelope.status != STATUS_OK {
            return Err(IngestError::api(format!(
                "cannot get {}: {}",
                path,
                envelope.describe()
            )));
        }

        envelope
            .data
            .filter(|data| !data.is_null())
            .map(Some)
            .ok_or_else(|| IngestError::api(format!("response for {} has no data", path)))
    }

    async fn fetch_page(
        &self,
        request: &CollectionRequest,
        params: &FetchParams,
        cursor: Option<&Cursor>,
    ) -> Result<RawPage> {
        let path = endpoints::collection_path(request);

        let mut query = params.query_pairs();
        query.push(("order_by", ORDER_BY.to_string()));
        query.push(("max_page_size", params.page_size.to_string()));
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.as_str().to_string()));
        }

        let envelope = self.request(Method::GET, &path, &query).await?;
        if envelope.status != STATUS_OK {
            return Err(IngestError::api(format!(
                "cannot get {}: {}",
                path,
                envelope.describe()
            )));
        }

        let data: PageData = match envelope.data {
            Some(data) if !data.is_null() => serde_json::from_value(data)
                .map_err(|e| IngestError::api(format!("unexpected page shape from {}: {}", path, e)))?,
            _ => PageData::default(),
        };

        let next_cursor = if data.page_info.has_next_page {
            data.page_info.cursor.filter(|c| !c.is_empty()).map(Cursor::new)
        } else {
            None
        };

        Ok(RawPage {
            items: data.items,
            next_cursor,
        })
    }

    async fn request_refresh(&self, resource: &Resource, params: &FetchParams) -> Result<()> {
        let path = endpoints::update_path(resource);
        let envelope = self.request(Method::POST, &path, &params.query_pairs()).await?;

        if envelope.status != STATUS_ACCEPTED {
            return Err(IngestError::api(format!(
                "refresh of {} not accepted: {}",
                path,
                envelope.describe()
            )));
        }
        Ok(())
    }

    async fn refresh_status(&self, resource: &Resource, params: &FetchParams) -> Result<RefreshStatus> {
        let path = endpoints::update_path(resource);
        let envelope = self.request(Method::GET, &path, &params.query_pairs()).await?;

        if envelope.status != STATUS_OK {
            return Err(IngestError::api(format!(
                "cannot get refresh status of {}: {}",
                path,
                envelope.describe()
            )));
        }

        let data: UpdateData = envelope
            .data
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| IngestError::api(format!("unexpected refresh status from {}: {}", path, e)))?
            .ok_or_else(|| IngestError::api(format!("refresh status of {} has no data", path)))?;

        Ok(RefreshStatus::from(data.status.as_str()))
    }
}
