//! Ingestion framework
//!
//! The pipeline core: capability traits ([`RemoteSource`], [`RecordStore`]),
//! the pagination driver, retry policy, resume ledger, upsert writer and the
//! orchestrator that ties them together. Nothing here knows about HTTP or a
//! particular database.

pub mod orchestrator;
pub mod pagination;
pub mod progress;
pub mod retry;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;
pub mod writer;

pub use orchestrator::{Orchestrator, RunOptions};
pub use pagination::{Page, Paginator};
pub use progress::{Checkpoint, ProgressTracker, ResumePoint};
pub use retry::RetryPolicy;
pub use source::RemoteSource;
pub use stats::{IngestStats, RunReport, TargetOutcome, TargetStatus};
pub use store::{LedgerReset, ProgressEntry, ProgressStatus, RecordStore, ResetScope, WriteOutcome};
pub use types::{
    Collection, CollectionRequest, Cursor, FetchParams, RawPage, RawRecord, RefreshStatus, Resource,
    SearchQuery, SearchType,
};
pub use writer::UpsertWriter;
