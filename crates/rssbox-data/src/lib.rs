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

//! Shared Postgres store for the rssbox worker fleet.
//!
//! Every mutation of coordination state goes through conditional
//! single-statement updates (`UPDATE ... RETURNING` over a
//! `FOR UPDATE SKIP LOCKED` pick) or an explicit transaction, so concurrent
//! workers never observe a partially applied lease transition.

mod accounts;
mod downloads;
pub mod model;
mod pairs;
mod store;
mod watermarks;
mod workers;

pub use model::{Account, AccountStatus, Download, DownloadStatus, RETRY_LIMIT, Worker};
pub use pairs::FailureDisposition;
pub use store::Store;
