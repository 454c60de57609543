//! # Design
//!
//! - Constant error messages; operation identifiers and payload details
//!   travel in fields.
//! - Transport errors keep their `reqwest` source so callers can classify
//!   connection failures and TLS truncation without string matching.

use thiserror::Error;

/// Result alias for seedr operations.
pub type Result<T> = std::result::Result<T, SeedrError>;

/// Errors produced by the seedr client.
#[derive(Debug, Error)]
pub enum SeedrError {
    /// The HTTP request itself failed.
    #[error("seedr http request failed")]
    Http {
        /// RPC function that was being called.
        operation: &'static str,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// The cache answered with a non-success status.
    #[error("seedr responded with an error status")]
    Status {
        /// RPC function that was being called.
        operation: &'static str,
        /// HTTP status code returned.
        status: u16,
    },
    /// The response body did not carry the shape the RPC contract promises.
    #[error("seedr response was malformed")]
    Malformed {
        /// RPC function that was being called.
        operation: &'static str,
        /// What was missing or unreadable.
        detail: String,
    },
}
