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

//! Feed polling with watermark-based deduplication.
//!
//! Each poll delivers only the entries published after the stored watermark,
//! and the watermark advances only once the consumer has acknowledged the
//! batch, so a failed delivery is retried on the next poll and nothing is
//! ever handed over twice.

mod watcher;

pub use watcher::{EntryConsumer, FeedEntry, FeedWatcher, WatermarkStore};
