//! Stale-lease reclamation.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use rssbox_data::Store;
use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;

/// How often every worker runs the reaper.
pub const REAP_INTERVAL: Duration = Duration::from_secs(40);

/// Heartbeat silence after which a worker is considered dead and its leases
/// forfeit.
const STALE_AFTER_SECS: i64 = 40;

/// What one reaper pass reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapSummary {
    /// Workers whose records were deleted.
    pub dead_workers: Vec<String>,
    /// Account leases released.
    pub accounts_released: u64,
    /// Download claims released.
    pub downloads_released: u64,
}

/// Detects dead workers and returns their leases to the pool.
///
/// Safe to run concurrently on any number of workers: every reclaim is one
/// conditional update, and a second pass over an already-reclaimed store is
/// a no-op. Worker deletion and lease reclamation are deliberately not
/// transactional; the reclaim predicate treats a missing owner row the same
/// as a stale one.
#[derive(Clone)]
pub struct LeaseReaper {
    store: Store,
}

impl LeaseReaper {
    /// Build a reaper over the shared store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Run one reclamation pass against the clock value `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the store operations fail; a partial pass
    /// is harmless and is completed by the next run.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReapSummary> {
        debug!("reaping stale workers and orphaned leases");
        let threshold = now - TimeDelta::seconds(STALE_AFTER_SECS);

        let dead_workers = self.store.delete_stale_workers(threshold).await?;
        if dead_workers.is_empty() {
            debug!("no stale workers to remove");
        } else {
            info!(count = dead_workers.len(), workers = ?dead_workers, "removed stale workers");
        }

        let accounts_released = self.store.release_orphaned_accounts(threshold).await?;
        let downloads_released = self.store.release_orphaned_downloads(threshold).await?;
        if accounts_released > 0 || downloads_released > 0 {
            info!(
                accounts = accounts_released,
                downloads = downloads_released,
                "released orphaned leases"
            );
        }

        Ok(ReapSummary {
            dead_workers,
            accounts_released,
            downloads_released,
        })
    }

    /// Register the periodic reaper job on `scheduler`.
    pub fn schedule(&self, scheduler: &Scheduler) {
        let reaper = self.clone();
        scheduler.add_interval_job("lease-reaper", REAP_INTERVAL, move || {
            let reaper = reaper.clone();
            async move {
                if let Err(err) = reaper.run_once(Utc::now()).await {
                    warn!(error = %err, "reaper pass failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The schedule cadence and the staleness window move in lockstep: a
    // worker is declared dead after missing one full reap interval.
    #[test]
    fn stale_window_matches_reap_interval() {
        assert_eq!(REAP_INTERVAL.as_secs(), 40);
        assert_eq!(STALE_AFTER_SECS, 40);
    }
}
