//! Worker liveness records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::model::Worker;
use crate::store::Store;

const UPSERT_HEARTBEAT: &str = r"
    INSERT INTO workers (id, last_heartbeat)
    VALUES ($1, $2)
    ON CONFLICT (id) DO UPDATE SET last_heartbeat = EXCLUDED.last_heartbeat
";

const DELETE_WORKER: &str = r"DELETE FROM workers WHERE id = $1";

const DELETE_STALE_WORKERS: &str = r"
    DELETE FROM workers
    WHERE last_heartbeat < $1
    RETURNING id
";

const FETCH_WORKER: &str = r"SELECT id, last_heartbeat FROM workers WHERE id = $1";

impl Store {
    /// Record that `worker_id` is alive at `now`, creating the record on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(UPSERT_HEARTBEAT)
            .bind(worker_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("failed to upsert worker heartbeat")?;
        Ok(())
    }

    /// Remove the liveness record on clean shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_worker(&self, worker_id: &str) -> Result<()> {
        sqlx::query(DELETE_WORKER)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .context("failed to delete worker record")?;
        Ok(())
    }

    /// Load one worker's liveness record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn fetch_worker(&self, worker_id: &str) -> Result<Option<Worker>> {
        sqlx::query_as::<_, Worker>(FETCH_WORKER)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch worker record")
    }

    /// Delete every worker whose heartbeat predates `threshold`, returning
    /// the ids of the removed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_stale_workers(&self, threshold: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(DELETE_STALE_WORKERS)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await
            .context("failed to delete stale workers")?;

        rows.iter()
            .map(|row| row.try_get("id").context("stale worker row missing id"))
            .collect()
    }
}
