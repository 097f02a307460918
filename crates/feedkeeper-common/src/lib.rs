//! Feedkeeper Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error types and logging setup used by every feedkeeper binary.
//!
//! # Example
//!
//! ```no_run
//! use feedkeeper_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env()?;
//! let _guard = init_logging(&config)?;
//! tracing::info!("ready");
//! # Ok::<(), feedkeeper_common::CommonError>(())
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
