//! Named periodic jobs for one worker process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// Process-wide periodic task scheduler.
///
/// Each job is identified by name and runs on a fixed interval with at most
/// one instance in flight: the next tick waits for the previous run to
/// finish, and missed ticks are delayed instead of bursting. Jobs live
/// until they are removed or the scheduler shuts down.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` to run every `period`, starting one period from now.
    /// A job already registered under the same id is replaced.
    pub fn add_interval_job<F, Fut>(&self, id: impl Into<String>, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let id = id.into();
        debug!(job = %id, period_secs = period.as_secs(), "scheduling interval job");
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        if let Some(replaced) = self.lock().insert(id, handle) {
            replaced.abort();
        }
    }

    /// Cancel the job registered under `id`, if any.
    pub fn remove_job(&self, id: &str) {
        if let Some(handle) = self.lock().remove(id) {
            debug!(job = %id, "removing interval job");
            handle.abort();
        }
    }

    /// Cancel every registered job.
    pub fn shutdown(&self) {
        for (id, handle) in self.lock().drain() {
            debug!(job = %id, "stopping interval job");
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
