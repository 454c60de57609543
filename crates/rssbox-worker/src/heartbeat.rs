//! Worker liveness advertisement.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rssbox_data::Store;
use tracing::{debug, warn};

use crate::scheduler::Scheduler;

/// How often a live worker rewrites its heartbeat record.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Scoped liveness record for one worker.
///
/// Between [`Heartbeat::start`] and [`Heartbeat::stop`] the worker's record
/// exists in the store with a heartbeat at most one interval old, barring
/// store outages. Stopping deletes the record, so a clean shutdown never
/// waits on the reaper.
pub struct Heartbeat {
    worker_id: String,
    store: Store,
    scheduler: Arc<Scheduler>,
}

impl Heartbeat {
    /// Build the heartbeat for `worker_id`.
    #[must_use]
    pub const fn new(worker_id: String, store: Store, scheduler: Arc<Scheduler>) -> Self {
        Self {
            worker_id,
            store,
            scheduler,
        }
    }

    /// Write the first heartbeat and schedule the periodic rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial write fails; the periodic job is not
    /// scheduled in that case.
    pub async fn start(&self) -> Result<()> {
        debug!(worker = %self.worker_id, "starting heartbeat");
        self.store
            .upsert_heartbeat(&self.worker_id, Utc::now())
            .await?;

        let store = self.store.clone();
        let worker_id = self.worker_id.clone();
        self.scheduler
            .add_interval_job(self.job_id(), HEARTBEAT_INTERVAL, move || {
                let store = store.clone();
                let worker_id = worker_id.clone();
                async move {
                    debug!(worker = %worker_id, "updating heartbeat");
                    if let Err(err) = store.upsert_heartbeat(&worker_id, Utc::now()).await {
                        warn!(worker = %worker_id, error = %err, "heartbeat write failed");
                    }
                }
            });
        Ok(())
    }

    /// Cancel the periodic rewrite and delete the liveness record.
    ///
    /// Runs on every shutdown path; a failed delete is only logged, since
    /// the reaper will collect the record anyway.
    pub async fn stop(&self) {
        debug!(worker = %self.worker_id, "stopping heartbeat");
        self.scheduler.remove_job(&self.job_id());
        if let Err(err) = self.store.delete_worker(&self.worker_id).await {
            warn!(worker = %self.worker_id, error = %err, "failed to delete worker record");
        }
    }

    fn job_id(&self) -> String {
        format!("heartbeat-{}", self.worker_id)
    }
}
