//! Error types shared by feedkeeper crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid log output: {0}")]
    InvalidLogOutput(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("Invalid log filter directive '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Failed to create log directory '{path}': {source}")]
    LogDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
