//! Coupled account + download transitions.
//!
//! The account and its download reference each other by id; every mutation
//! that touches both sides runs in one transaction so a crash can only ever
//! leave a state the reaper knows how to correct.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Download, RETRY_LIMIT};
use crate::store::Store;

const ACCOUNT_DOWNLOADING: &str = r"
    UPDATE accounts
    SET status = 'DOWNLOADING', download_id = $2, added_at = $3, locked_by = NULL
    WHERE id = $1
";

const DOWNLOAD_PROCESSING: &str = r"
    UPDATE downloads
    SET status = 'PROCESSING', download_name = $2, locked_by = NULL
    WHERE id = $1
";

const ACCOUNT_IDLE: &str = r"
    UPDATE accounts
    SET status = 'IDLE', locked_by = NULL, download_id = NULL, added_at = NULL
    WHERE id = $1
";

const DOWNLOAD_PENDING: &str = r"
    UPDATE downloads
    SET status = 'PENDING', download_name = NULL, locked_by = NULL
    WHERE id = $1
";

const DOWNLOAD_REQUEUE: &str = r"
    UPDATE downloads
    SET status = 'PENDING', download_name = NULL, locked_by = NULL, retries = $2
    WHERE id = $1
";

const DELETE_DOWNLOAD: &str = r"DELETE FROM downloads WHERE id = $1";

/// What happened to a download after a failed upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The download went back to the queue for another attempt.
    Requeued {
        /// Retry count now recorded on the row.
        retries: i64,
    },
    /// The retry budget ran out and the row was deleted.
    Dropped,
}

impl Store {
    /// Commit a confirmed cache submission: the account starts downloading
    /// and the queue entry becomes processing under the name the cache
    /// assigned. The transient claims on both rows are released.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn begin_downloading(
        &self,
        account_id: &str,
        download_id: Uuid,
        download_name: Option<&str>,
        added_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open begin-downloading transaction")?;
        sqlx::query(ACCOUNT_DOWNLOADING)
            .bind(account_id)
            .bind(download_id)
            .bind(added_at)
            .execute(&mut *tx)
            .await
            .context("failed to move account to downloading")?;
        sqlx::query(DOWNLOAD_PROCESSING)
            .bind(download_id)
            .bind(download_name)
            .execute(&mut *tx)
            .await
            .context("failed to move download to processing")?;
        tx.commit()
            .await
            .context("failed to commit begin-downloading transaction")?;
        Ok(())
    }

    /// Commit a finished delivery: the account returns to the pool and the
    /// queue entry disappears.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn complete_pair(&self, account_id: &str, download_id: Uuid) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open completion transaction")?;
        sqlx::query(ACCOUNT_IDLE)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context("failed to idle account on completion")?;
        sqlx::query(DELETE_DOWNLOAD)
            .bind(download_id)
            .execute(&mut *tx)
            .await
            .context("failed to delete completed download")?;
        tx.commit()
            .await
            .context("failed to commit completion transaction")?;
        Ok(())
    }

    /// Revert an account and its download to (idle, pending) without
    /// touching the retry counter. Used for timeouts, vanished torrents and
    /// submissions the cache never named.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn reset_pair(&self, account_id: &str, download_id: Uuid) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open reset transaction")?;
        sqlx::query(ACCOUNT_IDLE)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context("failed to idle account on reset")?;
        sqlx::query(DOWNLOAD_PENDING)
            .bind(download_id)
            .execute(&mut *tx)
            .await
            .context("failed to re-queue download on reset")?;
        tx.commit().await.context("failed to commit reset transaction")?;
        Ok(())
    }

    /// Record a failed upload attempt. Hard failures consume one retry;
    /// soft failures are charged to the transport, not the download. A
    /// download that reaches [`RETRY_LIMIT`] is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn fail_pair(
        &self,
        account_id: &str,
        download: &Download,
        soft: bool,
    ) -> Result<FailureDisposition> {
        let retries = next_retries(download.retries, soft);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to open failure transaction")?;
        sqlx::query(ACCOUNT_IDLE)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .context("failed to idle account on failure")?;

        let disposition = if retries >= RETRY_LIMIT {
            sqlx::query(DELETE_DOWNLOAD)
                .bind(download.id)
                .execute(&mut *tx)
                .await
                .context("failed to drop exhausted download")?;
            FailureDisposition::Dropped
        } else {
            sqlx::query(DOWNLOAD_REQUEUE)
                .bind(download.id)
                .bind(retries)
                .execute(&mut *tx)
                .await
                .context("failed to re-queue failed download")?;
            FailureDisposition::Requeued { retries }
        };

        tx.commit()
            .await
            .context("failed to commit failure transaction")?;
        Ok(disposition)
    }
}

const fn next_retries(current: i64, soft: bool) -> i64 {
    if soft { current } else { current + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_failures_never_consume_retries() {
        assert_eq!(next_retries(0, true), 0);
        assert_eq!(next_retries(4, true), 4);
        assert_eq!(next_retries(0, false), 1);
    }

    #[test]
    fn retry_limit_boundary() {
        // 3 -> 4 re-queues, 4 -> 5 drops.
        assert!(next_retries(3, false) < RETRY_LIMIT);
        assert!(next_retries(4, false) >= RETRY_LIMIT);
    }

    #[test]
    fn soft_failures_alone_never_reach_the_limit() {
        let mut retries = 0;
        for _ in 0..10 {
            retries = next_retries(retries, true);
        }
        assert_eq!(next_retries(retries, false), 1);
    }
}
