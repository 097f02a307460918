//! Configuration management
//!
//! Values come from the environment (and a `.env` file when present), with
//! the defaults below. CLI flags override them afterwards.

use crate::api::{DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::{IngestError, Result};
use crate::framework::orchestrator::{
    DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE, DEFAULT_REFRESH_POLL_SECS, DEFAULT_REFRESH_TIMEOUT_SECS,
};
use crate::framework::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};
use crate::framework::writer::DEFAULT_STORE_TIMEOUT_SECS;
use crate::storage::DatabaseKind;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database: a SQLite file in the working directory, created on
/// first use.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://feedkeeper.db?mode=rwc";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Largest page the API serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Full configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
}

#[derive(Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub store_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub page_size: u32,
    pub concurrency: usize,
    pub refresh_poll_secs: u64,
    pub refresh_timeout_secs: u64,
}

impl Config {
    /// Load `.env`, read the environment and validate.
    ///
    /// `database_url` comes from the command line and wins over
    /// `DATABASE_URL`.
    pub fn load(database_url: Option<String>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_env();
        if let Some(url) = database_url {
            config.database.url = url;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read the environment without validating
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse().ok());

        Self {
            api: ApiConfig {
                base_url: lookup("FEEDKEEPER_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                access_token: lookup("FEEDKEEPER_ACCESS_TOKEN"),
                request_timeout_secs: parsed("FEEDKEEPER_REQUEST_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                store_timeout_secs: parsed_or(&lookup, "FEEDKEEPER_STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT_SECS),
            },
            ingest: IngestConfig {
                max_attempts: parsed_or(&lookup, "FEEDKEEPER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
                retry_base_ms: parsed_or(&lookup, "FEEDKEEPER_RETRY_BASE_MS", DEFAULT_BASE_DELAY_MS),
                retry_max_ms: parsed_or(&lookup, "FEEDKEEPER_RETRY_MAX_MS", DEFAULT_MAX_DELAY_MS),
                page_size: parsed_or(&lookup, "FEEDKEEPER_PAGE_SIZE", DEFAULT_PAGE_SIZE),
                concurrency: parsed_or(&lookup, "FEEDKEEPER_CONCURRENCY", DEFAULT_CONCURRENCY),
                refresh_poll_secs: parsed_or(&lookup, "FEEDKEEPER_REFRESH_POLL_SECS", DEFAULT_REFRESH_POLL_SECS),
                refresh_timeout_secs: parsed_or(
                    &lookup,
                    "FEEDKEEPER_REFRESH_TIMEOUT_SECS",
                    DEFAULT_REFRESH_TIMEOUT_SECS,
                ),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let api_url = url::Url::parse(&self.api.base_url)
            .map_err(|e| IngestError::config(format!("invalid API URL '{}': {}", self.api.base_url, e)))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(IngestError::config(format!(
                "API URL must be http(s), got '{}'",
                self.api.base_url
            )));
        }
        if self.api.access_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(IngestError::config("FEEDKEEPER_ACCESS_TOKEN is set but empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(IngestError::config("request timeout must be greater than 0"));
        }

        if self.database.url.is_empty() {
            return Err(IngestError::config("DATABASE_URL cannot be empty"));
        }
        DatabaseKind::from_url(&self.database.url)?;
        if self.database.max_connections == 0 {
            return Err(IngestError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        if self.database.store_timeout_secs == 0 {
            return Err(IngestError::config("store timeout must be greater than 0"));
        }

        if self.ingest.max_attempts == 0 {
            return Err(IngestError::config("FEEDKEEPER_MAX_ATTEMPTS must be at least 1"));
        }
        if self.ingest.retry_base_ms > self.ingest.retry_max_ms {
            return Err(IngestError::config(format!(
                "retry base delay ({} ms) cannot exceed the maximum delay ({} ms)",
                self.ingest.retry_base_ms, self.ingest.retry_max_ms
            )));
        }
        if self.ingest.page_size == 0 || self.ingest.page_size > MAX_PAGE_SIZE {
            return Err(IngestError::config(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.ingest.page_size
            )));
        }
        if self.ingest.concurrency == 0 {
            return Err(IngestError::config("FEEDKEEPER_CONCURRENCY must be at least 1"));
        }

        Ok(())
    }

    /// The access token, required by every command that talks to the API
    pub fn require_access_token(&self) -> Result<&str> {
        self.api
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::config("FEEDKEEPER_ACCESS_TOKEN is not set"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ingest.max_attempts,
            base_delay: Duration::from_millis(self.ingest.retry_base_ms),
            max_delay: Duration::from_millis(self.ingest.retry_max_ms),
            attempt_timeout: Duration::from_secs(self.api.request_timeout_secs),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.database.store_timeout_secs)
    }
}

fn parsed_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
