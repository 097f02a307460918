//! Target orchestration
//!
//! Drives every target through fetch, normalize, write and checkpoint:
//!
//! ```text
//! PENDING -> FETCHING -> PAGE_DONE -> ... -> TARGET_DONE
//!               |
//!               +-> ERROR (progress row failed, run continues)
//! ```
//!
//! Targets run concurrently (`buffer_unordered`); everything inside one
//! target is sequential. Posts expand into comments, comments into replies,
//! and both into their owner (and group) profiles. Nested collections finish
//! before the page that produced them is checkpointed, so a resumed run
//! never skips nested work.
//!
//! Cancellation is observed between pages only. An authorization failure
//! cancels the run: in-flight targets stop at their next page boundary and
//! no new target starts.

use crate::error::{IngestError, Result};
use crate::framework::pagination::Paginator;
use crate::framework::progress::{Checkpoint, ProgressTracker};
use crate::framework::retry::RetryPolicy;
use crate::framework::source::RemoteSource;
use crate::framework::stats::{IngestStats, RunReport, TargetOutcome, TargetStatus};
use crate::framework::store::RecordStore;
use crate::framework::types::{Collection, CollectionRequest, FetchParams, RawRecord, Resource};
use crate::framework::writer::{UpsertWriter, DEFAULT_STORE_TIMEOUT_SECS};
use crate::normalize::{normalize, CommentRow, PostRow, Row};
use chrono::{NaiveDateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_REFRESH_POLL_SECS: u64 = 3;
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 300;

/// Behaviour switches for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Fetch comments of posts and replies of comments
    pub fetch_comments: bool,
    /// Per-collection cap on comments (and replies per comment)
    pub max_comments: Option<u32>,
    /// Per-collection cap on posts of a profile or search
    pub max_posts: Option<u32>,
    /// Per-collection cap on pages
    pub max_pages: Option<u32>,
    pub fetch_feed_posts: bool,
    pub fetch_community_posts: bool,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
    pub owner_profiles: bool,
    pub refresh: bool,
    /// Forget the ledger of each target before fetching it
    pub restart: bool,
    pub concurrency: usize,
    pub page_size: u32,
    pub refresh_poll: Duration,
    pub refresh_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fetch_comments: false,
            max_comments: None,
            max_posts: None,
            max_pages: None,
            fetch_feed_posts: false,
            fetch_community_posts: false,
            from_date: None,
            to_date: None,
            owner_profiles: true,
            refresh: true,
            restart: false,
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            refresh_poll: Duration::from_secs(DEFAULT_REFRESH_POLL_SECS),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        }
    }
}

impl RunOptions {
    pub fn fetch_params(&self) -> FetchParams {
        FetchParams {
            load_comments: self.fetch_comments,
            max_comments: self.max_comments,
            load_feed_posts: self.fetch_feed_posts,
            load_community_posts: self.fetch_community_posts,
            max_posts: self.max_posts,
            from_date: self.from_date,
            to_date: self.to_date,
            page_size: self.page_size,
        }
    }

    /// Collections a target owns, keyed by its ledger id
    pub fn target_collections(&self, target: &Resource) -> Vec<Collection> {
        let mut collections = vec![Collection::Item];
        match target {
            Resource::Post(_) if self.fetch_comments => collections.push(Collection::Comments),
            Resource::Comment(_) if self.fetch_comments => collections.push(Collection::Replies),
            Resource::Profile(_) => {
                if self.fetch_feed_posts {
                    collections.push(Collection::FeedPosts);
                }
                if self.fetch_community_posts {
                    collections.push(Collection::CommunityPosts);
                }
            },
            Resource::Search(_) => collections.push(Collection::SearchPosts),
            _ => {},
        }
        collections
    }
}

/// Mutable state of one target while it runs
struct TargetRun {
    stats: IngestStats,
    cancel: CancellationToken,
}

impl TargetRun {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

enum TargetProgress {
    Done,
    Skipped,
}

pub struct Orchestrator {
    source: Arc<dyn RemoteSource>,
    writer: UpsertWriter,
    tracker: ProgressTracker,
    retry: RetryPolicy,
    options: RunOptions,
    params: FetchParams,
    cancel: CancellationToken,
    /// Profiles already fetched in this run
    seen_profiles: Mutex<HashSet<i64>>,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn RemoteSource>, store: Arc<dyn RecordStore>, options: RunOptions) -> Self {
        let run_id = Uuid::new_v4().to_string();
        Self {
            source,
            writer: UpsertWriter::new(store.clone(), Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS)),
            tracker: ProgressTracker::new(store, run_id),
            retry: RetryPolicy::default(),
            params: options.fetch_params(),
            options,
            cancel: CancellationToken::new(),
            seen_profiles: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.writer = UpsertWriter::new(self.writer.store().clone(), timeout);
        self
    }

    /// Token that stops the run at the next page boundary when cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        self.tracker.run_id()
    }

    /// Process every target and report how each one ended.
    pub async fn run(&self, targets: Vec<Resource>) -> RunReport {
        let mut stats = IngestStats::new();
        let total = targets.len();
        let concurrency = self.options.concurrency.max(1);
        let abort = self.cancel.child_token();
        let auth_failure: Mutex<Option<String>> = Mutex::new(None);

        info!(
            run_id = self.run_id(),
            targets = total,
            concurrency,
            "Starting ingestion run"
        );

        let abort_ref = &abort;
        let auth_ref = &auth_failure;
        let results: Vec<Option<TargetOutcome>> = stream::iter(targets.into_iter().enumerate())
            .map(|(index, target)| async move {
                if abort_ref.is_cancelled() {
                    debug!(key = %target, "Run stopped, target not started");
                    return None;
                }

                let key = target.target_key();
                let span = info_span!("target", key = %key, index = index + 1, total);
                let (outcome, auth) = self
                    .run_target(target, abort_ref.clone())
                    .instrument(span)
                    .await;

                if let Some(message) = auth {
                    error!(key = %key, error = %message, "Authorization failed, stopping run");
                    let mut slot = auth_ref.lock().unwrap_or_else(|e| e.into_inner());
                    slot.get_or_insert(message);
                    abort_ref.cancel();
                }
                Some(outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let outcomes: Vec<TargetOutcome> = results.into_iter().flatten().collect();
        for outcome in &outcomes {
            stats = stats.merge(outcome.stats.clone());
        }
        stats.complete();

        let report = RunReport {
            run_id: self.run_id().to_string(),
            targets: outcomes,
            stats,
            auth_failure: auth_failure.into_inner().unwrap_or_else(|e| e.into_inner()),
            cancelled: self.cancel.is_cancelled(),
        };

        info!(
            run_id = %report.run_id,
            done = report.count(TargetStatus::Done),
            skipped = report.count(TargetStatus::Skipped),
            failed = report.count(TargetStatus::Failed),
            cancelled = report.count(TargetStatus::Cancelled),
            not_started = total - report.targets.len(),
            inserted = report.stats.records_inserted,
            updated = report.stats.records_updated,
            duration_secs = report.stats.duration_secs,
            "Ingestion run finished"
        );

        report
    }

    /// Returns the outcome, plus the message of an authorization failure
    async fn run_target(&self, target: Resource, cancel: CancellationToken) -> (TargetOutcome, Option<String>) {
        let mut run = TargetRun {
            stats: IngestStats::new(),
            cancel,
        };

        let result = self.process_target(&target, &mut run).await;
        run.stats.complete();

        let (status, error, auth) = match result {
            Ok(TargetProgress::Done) => (TargetStatus::Done, None, None),
            Ok(TargetProgress::Skipped) => (TargetStatus::Skipped, None, None),
            Err(IngestError::Cancelled) => {
                info!("Target interrupted, progress kept for the next run");
                (TargetStatus::Cancelled, None, None)
            },
            Err(e) => {
                error!(error = %e, "Target failed");
                let auth = matches!(e, IngestError::Auth(_)).then(|| e.to_string());
                (TargetStatus::Failed, Some(e.to_string()), auth)
            },
        };

        info!(
            status = %status,
            inserted = run.stats.records_inserted,
            updated = run.stats.records_updated,
            failed = run.stats.records_failed,
            pages = run.stats.pages_fetched,
            "Target finished"
        );

        let outcome = TargetOutcome {
            target_key: target.target_key(),
            status,
            error,
            stats: run.stats,
        };
        (outcome, auth)
    }

    async fn process_target(&self, target: &Resource, run: &mut TargetRun) -> Result<TargetProgress> {
        run.check_cancelled()?;
        let ledger_id = target.ledger_id();

        if self.options.restart {
            let removed = self.tracker.restart(&ledger_id).await?;
            info!(
                connections = removed.connections,
                progress = removed.progress,
                "Cleared ledger for target"
            );
        }

        let mut pending = false;
        let mut fresh = true;
        for collection in self.options.target_collections(target) {
            let point = self.tracker.resume_point(&ledger_id, collection).await?;
            pending |= !point.is_done();
            fresh &= point.is_fresh();
        }
        if !pending {
            info!("Already done in an earlier run, skipping");
            return Ok(TargetProgress::Skipped);
        }

        if fresh && self.options.refresh {
            self.refresh(target, run).await?;
        } else if !fresh {
            info!("Resuming target");
        }

        if !self.fetch_target_item(target, run).await? {
            return Ok(TargetProgress::Skipped);
        }

        match target {
            Resource::Profile(_) => {
                let wanted = [
                    (Collection::FeedPosts, self.options.fetch_feed_posts),
                    (Collection::CommunityPosts, self.options.fetch_community_posts),
                ];
                for (collection, enabled) in wanted {
                    if enabled {
                        let request = CollectionRequest::profile_posts(&ledger_id, collection);
                        self.walk(request, self.options.max_posts, run).await?;
                    }
                }
            },
            Resource::Search(query) => {
                let request = CollectionRequest::search_posts(query.clone());
                self.walk(request, self.options.max_posts, run).await?;
            },
            Resource::Post(_) | Resource::Comment(_) => {},
        }

        Ok(TargetProgress::Done)
    }

    /// Ask the API to re-collect the target and wait for it, bounded by the
    /// refresh timeout. Failures other than auth fall back to whatever the
    /// API already has.
    async fn refresh(&self, target: &Resource, run: &TargetRun) -> Result<()> {
        let source = &*self.source;
        let params = &self.params;

        let requested = self
            .retry
            .run("request_refresh", || source.request_refresh(target, params))
            .await;
        match requested {
            Ok(()) => debug!("Refresh requested"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Refresh request failed, using cached data");
                return Ok(());
            },
        }

        let deadline = tokio::time::Instant::now() + self.options.refresh_timeout;
        loop {
            let status = match self
                .retry
                .run("refresh_status", || source.refresh_status(target, params))
                .await
            {
                Ok(status) => status,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Refresh status unavailable, using cached data");
                    return Ok(());
                },
            };

            if status.is_terminal() {
                debug!(status = status.as_str(), "Refresh finished");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    status = status.as_str(),
                    timeout_secs = self.options.refresh_timeout.as_secs(),
                    "Refresh still running, using cached data"
                );
                return Ok(());
            }

            tokio::select! {
                _ = run.cancel.cancelled() => return Err(IngestError::Cancelled),
                _ = tokio::time::sleep(poll_delay(self.options.refresh_poll)) => {},
            }
        }
    }

    /// Fetch, store and expand the target item itself.
    ///
    /// Returns false when the API does not know the item. That is not a
    /// failure: every collection of the target is closed so later runs skip
    /// it.
    async fn fetch_target_item(&self, target: &Resource, run: &mut TargetRun) -> Result<bool> {
        let ledger_id = target.ledger_id();

        match self.store_target_item(target, run).await {
            Ok(()) => {
                let checkpoint = Checkpoint {
                    cursor: None,
                    fetched: 1,
                    pages: 0,
                };
                self.tracker.complete(&ledger_id, Collection::Item, &checkpoint).await?;
                Ok(true)
            },
            Err(IngestError::NotFound(reason)) => {
                warn!(reason = %reason, "Target not available, nothing to fetch");
                run.stats.inc_skipped();
                for collection in self.options.target_collections(target) {
                    self.tracker
                        .complete(&ledger_id, collection, &Checkpoint::default())
                        .await?;
                }
                Ok(false)
            },
            Err(e) => {
                if !e.is_fatal() {
                    self.tracker
                        .fail(&ledger_id, Collection::Item, &Checkpoint::default(), &e.to_string())
                        .await?;
                }
                Err(e)
            },
        }
    }

    async fn store_target_item(&self, target: &Resource, run: &mut TargetRun) -> Result<()> {
        let source = &*self.source;
        let params = &self.params;
        let value = self
            .retry
            .run("fetch_item", || source.fetch_item(target, params))
            .await?
            .ok_or_else(|| IngestError::not_found(format!("{} is not available", target)))?;

        let record = match target {
            Resource::Post(_) => RawRecord::Post(value),
            Resource::Comment(_) => RawRecord::Comment {
                value,
                post_id: None,
                parent_comment_id: None,
            },
            Resource::Profile(_) => RawRecord::Profile(value),
            Resource::Search(query) => RawRecord::Search {
                value,
                query: query.clone(),
            },
        };

        let row = normalize(&record, Utc::now())?;
        let outcome = self.writer.write(&row).await?;
        run.stats.record(outcome);
        if let Row::Profile(profile) = &row {
            self.remember_profile(profile.id);
        }
        debug!(table = row.table(), key = %row.key(), ?outcome, "Stored target item");

        self.expand(&row, run).await
    }

    /// Walk one collection to its end (or limit), resuming from the ledger.
    fn walk<'a>(
        &'a self,
        request: CollectionRequest,
        limit: Option<u32>,
        run: &'a mut TargetRun,
    ) -> BoxFuture<'a, Result<()>> {
        let parent_id = request.parent_id();
        let collection = request.collection;
        let span = info_span!("collection", parent = %parent_id, collection = %collection);

        async move {
            let point = self.tracker.resume_point(&parent_id, collection).await?;
            if point.is_done() {
                debug!("Collection already done");
                return Ok(());
            }

            let mut checkpoint = point.checkpoint;
            if checkpoint.cursor.is_some() {
                info!(cursor = ?checkpoint.cursor, fetched = checkpoint.fetched, "Resuming collection");
            }

            let mut pager = Paginator::new(&*self.source, &self.retry, request, self.params.clone())
                .resume_from(checkpoint.cursor.clone());

            loop {
                run.check_cancelled()?;

                if let Some(limit) = limit {
                    if checkpoint.fetched >= i64::from(limit) {
                        debug!(limit, "Item limit reached");
                        break;
                    }
                }
                if let Some(max_pages) = self.options.max_pages {
                    if checkpoint.pages >= i64::from(max_pages) {
                        debug!(max_pages, "Page limit reached");
                        break;
                    }
                }

                let page = match pager.next_page().await {
                    Ok(Some(page)) => page,
                    Ok(None) => break,
                    Err(e) => {
                        if !e.is_fatal() {
                            warn!(cursor = ?checkpoint.cursor, error = %e, "Collection failed");
                            self.tracker
                                .fail(&parent_id, collection, &checkpoint, &e.to_string())
                                .await?;
                        }
                        return Err(e);
                    },
                };
                run.stats.inc_pages();

                let mut records = page.records;
                if let Some(limit) = limit {
                    let remaining = (i64::from(limit) - checkpoint.fetched).max(0) as usize;
                    records.truncate(remaining);
                }
                let taken = records.len() as i64;

                let mut ids = Vec::with_capacity(records.len());
                for record in &records {
                    let Some(row) = self.persist(record, run).await else {
                        continue;
                    };
                    if let Err(e) = self.expand(&row, run).await {
                        if !e.is_fatal() {
                            warn!(cursor = ?checkpoint.cursor, record_id = %row.key(), error = %e, "Nested fetch failed");
                            self.tracker
                                .fail(&parent_id, collection, &checkpoint, &e.to_string())
                                .await?;
                        }
                        return Err(e);
                    }
                    if let Some(id) = row_id(&row) {
                        ids.push(id);
                    }
                }

                let added = self.tracker.mark_page(&parent_id, collection, &ids).await?;
                run.stats.add_connections(added);

                checkpoint.fetched += taken;
                checkpoint.pages += 1;
                checkpoint.cursor = page.next_cursor;
                if checkpoint.cursor.is_none() {
                    break;
                }
                self.tracker.save_cursor(&parent_id, collection, &checkpoint).await?;
            }

            self.tracker.complete(&parent_id, collection, &checkpoint).await?;
            debug!(fetched = checkpoint.fetched, pages = checkpoint.pages, "Collection done");
            Ok(())
        }
        .instrument(span)
        .boxed()
    }

    /// Normalize and write one record. Record-level failures are logged and
    /// counted, never returned.
    async fn persist(&self, record: &RawRecord, run: &mut TargetRun) -> Option<Row> {
        let row = match normalize(record, Utc::now()) {
            Ok(row) => row,
            Err(e) => {
                warn!(kind = record.kind(), record_id = %record.raw_id(), error = %e, "Skipping record");
                run.stats.inc_failed();
                return None;
            },
        };

        match self.writer.write(&row).await {
            Ok(outcome) => {
                run.stats.record(outcome);
                Some(row)
            },
            Err(e) => {
                warn!(table = row.table(), record_id = %row.key(), error = %e, "Skipping record");
                run.stats.inc_failed();
                None
            },
        }
    }

    async fn expand(&self, row: &Row, run: &mut TargetRun) -> Result<()> {
        match row {
            Row::Post(post) => self.expand_post(post, run).await,
            Row::Comment(comment) => self.expand_comment(comment, run).await,
            Row::Profile(_) | Row::Search(_) => Ok(()),
        }
    }

    async fn expand_post(&self, post: &PostRow, run: &mut TargetRun) -> Result<()> {
        if let Some(owner_id) = post.owner.id {
            self.fetch_related_profile(owner_id, run).await?;
        }
        if let Some(group_id) = post.group_id {
            self.fetch_related_profile(group_id, run).await?;
        }

        if !self.options.fetch_comments {
            return Ok(());
        }
        if post.comments_count == Some(0) {
            // Nothing to page through, but the collection still counts as walked
            self.tracker
                .complete(&post.id.to_string(), Collection::Comments, &Checkpoint::default())
                .await?;
        } else {
            let request = CollectionRequest::comments(post.id);
            self.walk(request, self.options.max_comments, run).await?;
        }
        Ok(())
    }

    async fn expand_comment(&self, comment: &CommentRow, run: &mut TargetRun) -> Result<()> {
        if let Some(owner_id) = comment.owner.id {
            self.fetch_related_profile(owner_id, run).await?;
        }

        let is_reply = comment.parent_comment_id.is_some();
        if self.options.fetch_comments && !is_reply && comment.replies_count != Some(0) {
            let request = CollectionRequest::replies(comment.post_id, comment.id);
            self.walk(request, self.options.max_comments, run).await?;
        }
        Ok(())
    }

    /// Fetch an owner or group profile once per run. Only auth failures and
    /// cancellation propagate; anything else skips the profile.
    async fn fetch_related_profile(&self, id: i64, run: &mut TargetRun) -> Result<()> {
        if !self.options.owner_profiles || !self.remember_profile(id) {
            return Ok(());
        }

        let resource = Resource::Profile(id.to_string());
        let source = &*self.source;
        let params = &self.params;
        let fetched = self
            .retry
            .run("fetch_item", || source.fetch_item(&resource, params))
            .await;

        match fetched {
            Ok(Some(value)) => {
                self.persist(&RawRecord::Profile(value), run).await;
            },
            Ok(None) => {
                debug!(profile_id = id, "Profile not available");
                run.stats.inc_skipped();
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(profile_id = id, error = %e, "Skipping profile");
                run.stats.inc_failed();
            },
        }
        Ok(())
    }

    /// Returns false if the profile was already seen in this run
    fn remember_profile(&self, id: i64) -> bool {
        let mut seen = self.seen_profiles.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(id)
    }
}

fn row_id(row: &Row) -> Option<i64> {
    match row {
        Row::Post(r) => Some(r.id),
        Row::Comment(r) => Some(r.id),
        Row::Profile(r) => Some(r.id),
        Row::Search(_) => None,
    }
}

/// Poll interval with +/-25% jitter
fn poll_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    base.mul_f64(rand::rng().random_range(0.75..=1.25))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::types::{SearchQuery, SearchType};

    #[test]
    fn test_poll_delay_jitter_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..50 {
            let delay = poll_delay(base);
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_secs(5));
        }
        assert_eq!(poll_delay(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_target_collections_follow_flags() {
        let options = RunOptions {
            fetch_comments: true,
            fetch_feed_posts: true,
            ..Default::default()
        };

        assert_eq!(
            options.target_collections(&Resource::Post("1".to_string())),
            vec![Collection::Item, Collection::Comments]
        );
        assert_eq!(
            options.target_collections(&Resource::Profile("alice".to_string())),
            vec![Collection::Item, Collection::FeedPosts]
        );

        let search = Resource::Search(SearchQuery {
            request: "rust".to_string(),
            search_type: SearchType::Latest,
            from_date: None,
            to_date: None,
        });
        assert_eq!(
            RunOptions::default().target_collections(&search),
            vec![Collection::Item, Collection::SearchPosts]
        );
    }

    #[test]
    fn test_fetch_params_mirror_options() {
        let options = RunOptions {
            fetch_comments: true,
            max_comments: Some(50),
            page_size: 20,
            ..Default::default()
        };
        let params = options.fetch_params();
        assert!(params.load_comments);
        assert_eq!(params.max_comments, Some(50));
        assert_eq!(params.page_size, 20);
    }
}
