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

//! The rssbox worker: heartbeat, lease reaper, account pipeline and file
//! delivery.
//!
//! Any number of worker processes may run against the same store. Exclusive
//! ownership of an account or a download is only ever proven by a lease:
//! a locked status plus a `locked_by` pointing at a worker with a recent
//! heartbeat. The reaper forcibly reclaims leases whose owner has gone
//! quiet.

mod failure;
mod files;
mod heartbeat;
mod pipeline;
mod reaper;
mod scheduler;

pub use failure::FailureKind;
pub use files::FileHandler;
pub use heartbeat::{HEARTBEAT_INTERVAL, Heartbeat};
pub use pipeline::{AccountPipeline, BEGIN_DOWNLOAD_INTERVAL};
pub use reaper::{LeaseReaper, REAP_INTERVAL, ReapSummary};
pub use scheduler::Scheduler;

use rand::Rng;

/// Generate the identity of one worker process: 16 hex digits, unique for
/// the process lifetime.
#[must_use]
pub fn generate_worker_id() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_are_sixteen_hex_digits() {
        let id = generate_worker_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
