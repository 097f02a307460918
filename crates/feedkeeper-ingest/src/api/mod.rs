//! API client module
//!
//! HTTP access to the data365 social-media API.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::{ApiClient, DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
