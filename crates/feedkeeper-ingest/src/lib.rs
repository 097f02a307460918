//! Feedkeeper Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable ingestion of Facebook posts, comments, profiles and searches
//! from the data365 API into a relational store.
//!
//! # Overview
//!
//! - **Framework**: the pipeline core ([`framework::Orchestrator`]) over two
//!   capabilities, [`framework::RemoteSource`] and [`framework::RecordStore`]
//! - **Normalization**: raw API records to fixed table rows ([`normalize`])
//! - **API**: HTTP client for the remote API ([`api::ApiClient`])
//! - **Storage**: PostgreSQL and SQLite stores ([`storage`])
//! - **CLI**: `feedkeeper posts|profiles|search-posts|status|reset`
//!
//! # Example
//!
//! ```no_run
//! use feedkeeper_ingest::api::ApiClient;
//! use feedkeeper_ingest::framework::{Orchestrator, Resource, RunOptions};
//! use feedkeeper_ingest::storage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(ApiClient::new(
//!         "https://api.data365.co/v1.1",
//!         "token",
//!         Duration::from_secs(30),
//!     )?);
//!     let store = storage::connect("sqlite://feedkeeper.db?mode=rwc", 5).await?;
//!
//!     let report = Orchestrator::new(source, store, RunOptions::default())
//!         .run(vec![Resource::Post("1745230722290442".to_string())])
//!         .await;
//!     println!("{} inserted", report.stats.records_inserted);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod framework;
pub mod input;
pub mod normalize;
pub mod storage;

// Re-export commonly used types
pub use cli::{Cli, Commands};
pub use error::{IngestError, Result};
