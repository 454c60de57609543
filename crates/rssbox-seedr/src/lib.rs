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

//! HTTP client for the seedr torrent cache.
//!
//! The cache is an opaque RPC surface: torrents go in by URL, and some time
//! later the finished payload shows up in the account workspace as files and
//! folders. The client owns the bearer token for one account and refreshes
//! it transparently, announcing every fresh token through a [`TokenSink`] so
//! the credential store stays current.

mod client;
pub mod error;
mod listing;

pub use client::{AddTorrentOutcome, DEFAULT_BASE_URL, SeedrClient, TokenSink};
pub use error::{Result as SeedrResult, SeedrError};
pub use listing::{SeedrFile, SeedrFolder, SeedrItem, SeedrListing, SeedrTorrent};
