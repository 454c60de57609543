//! # Design
//!
//! - Constant error messages; context travels in structured fields.
//! - Startup configuration failures map to a non-zero process exit.

use std::io;

use thiserror::Error;

/// Result alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while assembling [`crate::Settings`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent.
    #[error("missing required environment variable")]
    MissingEnv {
        /// Name of the missing variable.
        name: &'static str,
    },
    /// An environment variable held a value the loader cannot use.
    #[error("invalid environment value")]
    InvalidValue {
        /// Name of the offending variable.
        name: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
        /// The rejected value.
        value: String,
    },
    /// Filesystem preparation for a configured path failed.
    #[error("io failure while resolving configured path")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}
