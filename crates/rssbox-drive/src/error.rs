//! # Design
//!
//! - Constant error messages with operation identifiers in fields.
//! - Transport errors keep their `reqwest` source for failure
//!   classification by the upload pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for object-store operations.
pub type Result<T> = std::result::Result<T, DriveError>;

/// Errors produced by the object-store client.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The configured credential is not of the form `{project}_{secret}`.
    #[error("object-store credential is malformed")]
    InvalidKey,
    /// The HTTP request failed.
    #[error("object-store http request failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// The store answered with a non-success status.
    #[error("object-store responded with an error status")]
    Status {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code returned.
        status: u16,
    },
    /// Reading the local file to upload failed.
    #[error("object-store io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Local path involved.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// An endpoint URL could not be assembled.
    #[error("object-store endpoint url is invalid")]
    Endpoint {
        /// Operation identifier.
        operation: &'static str,
        /// Source URL parse error.
        source: url::ParseError,
    },
}
