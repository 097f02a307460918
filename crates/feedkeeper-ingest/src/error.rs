//! Error types for feedkeeper ingestion
//!
//! The variants follow how far a failure propagates:
//!
//! - record level: [`IngestError::Normalization`], [`IngestError::Storage`]
//!   (the record is logged and skipped)
//! - target level: [`IngestError::Api`], exhausted [`IngestError::Transient`],
//!   database failures of the progress ledger (the target is marked failed
//!   and the run moves on)
//! - [`IngestError::NotFound`] ends a target without failing it
//! - run level: [`IngestError::Auth`], [`IngestError::Cancelled`]

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Network failure, timeout, rate limit or 5xx. Retried with backoff.
    #[error("Transient API failure: {0}")]
    Transient(String),

    /// Access token missing, invalid or expired
    #[error("Authorization failed: {0}. Check FEEDKEEPER_ACCESS_TOKEN.")]
    Auth(String),

    /// Well-formed request, unexpected answer
    #[error("API error: {0}")]
    Api(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A single raw record could not be mapped to a row
    #[error("Cannot normalize {kind} record: {message}")]
    Normalization { kind: &'static str, message: String },

    /// A row write was rejected for a reason other than the key conflict
    #[error("Write to '{table}' rejected: {message}")]
    Storage { table: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn normalization(kind: &'static str, msg: impl Into<String>) -> Self {
        Self::Normalization {
            kind,
            message: msg.into(),
        }
    }

    pub fn storage(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Storage {
            table: table.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Worth another attempt with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stops the whole run, not just the current target
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Cancelled)
    }
}
