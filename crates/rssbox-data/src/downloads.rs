//! Download queue operations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Download, DownloadRow};
use crate::store::Store;

const INSERT_DOWNLOAD: &str = r"
    INSERT INTO downloads (id, url, name, status, retries)
    VALUES ($1, $2, $3, 'PENDING', 0)
    ON CONFLICT (url) DO NOTHING
";

const CLAIM_PENDING: &str = r"
    UPDATE downloads
    SET locked_by = $1
    WHERE id = (
        SELECT id FROM downloads
        WHERE status = 'PENDING'
          AND (locked_by IS NULL OR locked_by = '')
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, url, name, status, download_name, locked_by, retries
";

const UNLOCK_DOWNLOAD: &str = r"UPDATE downloads SET locked_by = NULL WHERE id = $1";

const FIND_DOWNLOAD: &str = r"
    SELECT id, url, name, status, download_name, locked_by, retries
    FROM downloads
    WHERE id = $1
";

const FIND_DOWNLOAD_BY_URL: &str = r"
    SELECT id, url, name, status, download_name, locked_by, retries
    FROM downloads
    WHERE url = $1
";

const RELEASE_ORPHANED_DOWNLOADS: &str = r"
    UPDATE downloads
    SET status = 'PENDING', locked_by = NULL
    WHERE status IN ('PENDING', 'PROCESSING')
      AND locked_by IS NOT NULL
      AND NOT EXISTS (
          SELECT 1 FROM workers
          WHERE workers.id = downloads.locked_by
            AND workers.last_heartbeat >= $1
      )
";

impl Store {
    /// Enqueue a feed entry. Returns `false` when the URL is already known;
    /// duplicate announcements are deliberately swallowed.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails for any reason other than the
    /// unique URL constraint.
    pub async fn insert_download(&self, url: &str, name: &str) -> Result<bool> {
        let result = sqlx::query(INSERT_DOWNLOAD)
            .bind(Uuid::new_v4())
            .bind(url)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("failed to insert download")?;
        Ok(result.rows_affected() == 1)
    }

    /// Atomically claim one pending, unclaimed download for `worker_id`.
    /// No ordering is guaranteed. Returns `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn claim_pending_download(&self, worker_id: &str) -> Result<Option<Download>> {
        let row = sqlx::query_as::<_, DownloadRow>(CLAIM_PENDING)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to claim a pending download")?;
        Ok(row.map(Download::from))
    }

    /// Drop the transient claim on a download, leaving its status intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn unlock_download(&self, download_id: Uuid) -> Result<()> {
        sqlx::query(UNLOCK_DOWNLOAD)
            .bind(download_id)
            .execute(&self.pool)
            .await
            .context("failed to unlock download")?;
        Ok(())
    }

    /// Load one download by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_download(&self, download_id: Uuid) -> Result<Option<Download>> {
        let row = sqlx::query_as::<_, DownloadRow>(FIND_DOWNLOAD)
            .bind(download_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to find download")?;
        Ok(row.map(Download::from))
    }

    /// Load one download by source URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_download_by_url(&self, url: &str) -> Result<Option<Download>> {
        let row = sqlx::query_as::<_, DownloadRow>(FIND_DOWNLOAD_BY_URL)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("failed to find download by url")?;
        Ok(row.map(Download::from))
    }

    /// Reset every claimed download whose owner has no heartbeat at or
    /// after `threshold` back to an unclaimed pending state. Returns the
    /// number of downloads released.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn release_orphaned_downloads(&self, threshold: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(RELEASE_ORPHANED_DOWNLOADS)
            .bind(threshold)
            .execute(&self.pool)
            .await
            .context("failed to release orphaned downloads")?;
        Ok(result.rows_affected())
    }
}
