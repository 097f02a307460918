//! Pagination driver
//!
//! Walks one collection page by page. The driver only talks to the
//! [`RemoteSource`]; it never touches storage. The caller decides when a page
//! counts as done and persists [`Page::next_cursor`] itself, so resuming is a
//! matter of passing that cursor back to [`Paginator::resume_from`].

use crate::error::Result;
use crate::framework::retry::RetryPolicy;
use crate::framework::source::RemoteSource;
use crate::framework::types::{CollectionRequest, Cursor, FetchParams, RawRecord};
use tracing::{debug, warn};

/// A resolved batch of records
#[derive(Debug, Clone)]
pub struct Page {
    /// Cursor this page was fetched with (`None` for the first page)
    pub cursor: Option<Cursor>,
    pub records: Vec<RawRecord>,
    /// Where the following page starts, `None` when this was the last one
    pub next_cursor: Option<Cursor>,
}

pub struct Paginator<'a> {
    source: &'a dyn RemoteSource,
    retry: &'a RetryPolicy,
    request: CollectionRequest,
    params: FetchParams,
    cursor: Option<Cursor>,
    exhausted: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn RemoteSource,
        retry: &'a RetryPolicy,
        request: CollectionRequest,
        params: FetchParams,
    ) -> Self {
        Self {
            source,
            retry,
            request,
            params,
            cursor: None,
            exhausted: false,
        }
    }

    /// Start from a previously saved cursor instead of the beginning
    pub fn resume_from(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Cursor the next call to [`Paginator::next_page`] will use
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Fetch the next page, or `None` once the collection is exhausted.
    ///
    /// Transient failures are retried per the [`RetryPolicy`]; anything else
    /// is returned as is. A failed call leaves the driver where it was, so it
    /// may be called again with the same cursor.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }

        let source = self.source;
        let request = &self.request;
        let params = &self.params;
        let cursor = self.cursor.as_ref();

        let raw = self
            .retry
            .run("fetch_page", || source.fetch_page(request, params, cursor))
            .await?;

        debug!(
            target_key = %self.request.parent.target_key(),
            collection = %self.request.collection,
            cursor = ?self.cursor,
            items = raw.items.len(),
            has_next = raw.next_cursor.is_some(),
            "Fetched page"
        );

        if raw.items.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let mut next_cursor = raw.next_cursor;
        if next_cursor.is_some() && next_cursor == self.cursor {
            warn!(
                target_key = %self.request.parent.target_key(),
                collection = %self.request.collection,
                cursor = ?self.cursor,
                "API returned the same cursor again, stopping pagination"
            );
            next_cursor = None;
        }

        let records = raw
            .items
            .into_iter()
            .map(|value| self.request.resolve(value))
            .collect();

        let page = Page {
            cursor: self.cursor.take(),
            records,
            next_cursor: next_cursor.clone(),
        };

        match next_cursor {
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }

        Ok(Some(page))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::framework::types::{RawPage, RefreshStatus, Resource};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves pages keyed by cursor; records every cursor it was asked for.
    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<Option<String>, RawPage>,
        failures_left: Mutex<u32>,
        fatal: bool,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn page(mut self, cursor: Option<&str>, ids: &[i64], next: Option<&str>) -> Self {
            self.pages.insert(
                cursor.map(str::to_string),
                RawPage {
                    items: ids.iter().map(|id| json!({ "id": id })).collect(),
                    next_cursor: next.map(Cursor::new),
                },
            );
            self
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSource for ScriptedSource {
        async fn fetch_item(&self, _: &Resource, _: &FetchParams) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn fetch_page(
            &self,
            _: &CollectionRequest,
            _: &FetchParams,
            cursor: Option<&Cursor>,
        ) -> Result<RawPage> {
            let key = cursor.map(|c| c.as_str().to_string());
            self.calls.lock().unwrap().push(key.clone());
            if self.fatal {
                return Err(IngestError::api("malformed response"));
            }
            {
                let mut left = self.failures_left.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(IngestError::transient("HTTP 503"));
                }
            }
            Ok(self.pages.get(&key).cloned().unwrap_or_default())
        }

        async fn request_refresh(&self, _: &Resource, _: &FetchParams) -> Result<()> {
            Ok(())
        }

        async fn refresh_status(&self, _: &Resource, _: &FetchParams) -> Result<RefreshStatus> {
            Ok(RefreshStatus::Finished)
        }
    }

    fn ids(page: &Page) -> Vec<String> {
        page.records.iter().map(|r| r.raw_id()).collect()
    }

    #[tokio::test]
    async fn test_walks_pages_until_no_next_cursor() {
        let source = ScriptedSource::default()
            .page(None, &[1, 2], Some("c1"))
            .page(Some("c1"), &[3], None);
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default());

        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["1", "2"]);
        assert_eq!(first.cursor, None);
        assert_eq!(first.next_cursor, Some(Cursor::new("c1")));

        let second = pager.next_page().await.unwrap().unwrap();
        assert_eq!(ids(&second), vec!["3"]);
        assert_eq!(second.cursor, Some(Cursor::new("c1")));
        assert_eq!(second.next_cursor, None);

        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(source.calls(), vec![None, Some("c1".to_string())]);
    }

    #[tokio::test]
    async fn test_resume_never_requests_earlier_pages() {
        let source = ScriptedSource::default()
            .page(None, &[1, 2], Some("c1"))
            .page(Some("c1"), &[3], Some("c2"))
            .page(Some("c2"), &[4], None);
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default())
            .resume_from(Some(Cursor::new("c1")));

        let mut seen = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            seen.extend(ids(&page));
        }
        assert_eq!(seen, vec!["3", "4"]);
        assert!(!source.calls().contains(&None));
    }

    #[tokio::test]
    async fn test_empty_page_ends_sequence() {
        let source = ScriptedSource::default().page(None, &[], Some("c1"));
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default());

        assert!(pager.next_page().await.unwrap().is_none());
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_instead_of_looping() {
        let source = ScriptedSource::default().page(Some("c1"), &[5], Some("c1"));
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default())
            .resume_from(Some(Cursor::new("c1")));

        let page = pager.next_page().await.unwrap().unwrap();
        assert_eq!(page.next_cursor, None);
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = ScriptedSource {
            failures_left: Mutex::new(2),
            ..Default::default()
        }
        .page(None, &[1], None);
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default());

        let page = pager.next_page().await.unwrap().unwrap();
        assert_eq!(ids(&page), vec!["1"]);
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_api_error_is_returned_and_cursor_kept() {
        let source = ScriptedSource {
            fatal: true,
            ..Default::default()
        };
        let retry = RetryPolicy::immediate(3);
        let mut pager = Paginator::new(&source, &retry, CollectionRequest::comments(9), FetchParams::default())
            .resume_from(Some(Cursor::new("c7")));

        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, IngestError::Api(_)));
        assert_eq!(pager.cursor(), Some(&Cursor::new("c7")));
        assert_eq!(source.calls().len(), 1);
    }
}
