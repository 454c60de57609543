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

//! Binary entrypoint that wires the rssbox services together and runs one
//! worker process.

mod bootstrap;
mod cli;
mod consumer;
mod logging;

use anyhow::Result;

/// Bootstraps one rssbox worker and blocks until its pipeline run ends.
#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::run().await
}
