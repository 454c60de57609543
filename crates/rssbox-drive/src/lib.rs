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

//! Object-store client.
//!
//! Finished files land in a drive named by the MD5 of the file name, so
//! re-uploads of the same name overwrite rather than duplicate, and a
//! metadata table records one row per delivered file.

mod client;
pub mod error;

pub use client::{DriveClient, FILES_TABLE, FileRecord, content_key};
pub use error::{DriveError, Result as DriveResult};
