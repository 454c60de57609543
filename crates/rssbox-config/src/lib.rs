#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Environment-driven settings for the rssbox worker process.

pub mod error;
mod settings;

pub use error::{ConfigError, Result as ConfigResult};
pub use settings::{DEFAULT_FILTER_EXTENSIONS, LogLevel, Settings};
