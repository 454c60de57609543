//! Account lease operations.
//!
//! Every pick is one conditional `UPDATE ... RETURNING` over a
//! `FOR UPDATE SKIP LOCKED` subquery, so two workers racing for the same
//! account observe exactly one winner.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::model::{Account, AccountRow};
use crate::store::Store;

const ACQUIRE_FREE_ACCOUNT: &str = r"
    UPDATE accounts
    SET status = 'PROCESSING', locked_by = $1
    WHERE id = (
        SELECT id FROM accounts
        WHERE status = 'IDLE' OR status = ''
        ORDER BY priority DESC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, password, token, status, locked_by, download_id, added_at,
              last_checked_at, priority
";

const LEASE_DOWNLOADING_ACCOUNT: &str = r"
    UPDATE accounts
    SET status = 'LOCKED', locked_by = $1, last_checked_at = $2
    WHERE id = (
        SELECT id FROM accounts
        WHERE status = 'DOWNLOADING'
          AND (locked_by IS NULL OR locked_by = '')
        ORDER BY last_checked_at ASC NULLS FIRST
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, password, token, status, locked_by, download_id, added_at,
              last_checked_at, priority
";

const MARK_IDLE: &str = r"
    UPDATE accounts
    SET status = 'IDLE', locked_by = NULL, download_id = NULL, added_at = NULL
    WHERE id = $1
";

const MARK_UPLOADING: &str = r"
    UPDATE accounts SET status = 'UPLOADING', locked_by = $2 WHERE id = $1
";

const MARK_DOWNLOADING: &str = r"
    UPDATE accounts SET status = 'DOWNLOADING', locked_by = NULL WHERE id = $1
";

const SAVE_TOKEN: &str = r"UPDATE accounts SET token = $2 WHERE id = $1";

const FETCH_ACCOUNT: &str = r"
    SELECT id, password, token, status, locked_by, download_id, added_at,
           last_checked_at, priority
    FROM accounts
    WHERE id = $1
";

// An account lease is orphaned when no fresh worker row backs it. Stale
// workers are deleted separately and non-transactionally, so the predicate
// must not assume the owner row still exists.
const RELEASE_ORPHANED_ACCOUNTS: &str = r"
    UPDATE accounts
    SET status      = CASE WHEN status = 'PROCESSING' THEN 'IDLE' ELSE 'DOWNLOADING' END,
        download_id = CASE WHEN status = 'PROCESSING' THEN NULL ELSE download_id END,
        added_at    = CASE WHEN status = 'PROCESSING' THEN NULL ELSE added_at END,
        locked_by   = NULL
    WHERE status IN ('PROCESSING', 'UPLOADING', 'LOCKED')
      AND NOT EXISTS (
          SELECT 1 FROM workers
          WHERE workers.id = accounts.locked_by
            AND workers.last_heartbeat >= $1
      )
";

impl Store {
    /// Atomically reserve a free account for `worker_id`, highest priority
    /// first. Returns `None` when the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn acquire_free_account(&self, worker_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(ACQUIRE_FREE_ACCOUNT)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to acquire a free account")?;
        Ok(row.map(Account::from))
    }

    /// Atomically lock the least recently checked account that has a
    /// download sitting in the cache. Returns `None` when nothing is
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn lease_downloading_account(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(LEASE_DOWNLOADING_ACCOUNT)
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .context("failed to lease a downloading account")?;
        Ok(row.map(Account::from))
    }

    /// Return an account to the free pool, clearing every lease field.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_account_idle(&self, account_id: &str) -> Result<()> {
        sqlx::query(MARK_IDLE)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("failed to mark account idle")?;
        Ok(())
    }

    /// Move a locked account into the uploading state, keeping the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_account_uploading(&self, account_id: &str, worker_id: &str) -> Result<()> {
        sqlx::query(MARK_UPLOADING)
            .bind(account_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .context("failed to mark account uploading")?;
        Ok(())
    }

    /// Hand an account back to the polling pool. The lease is always
    /// released; a downloading account is never owned by anyone.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_account_downloading(&self, account_id: &str) -> Result<()> {
        sqlx::query(MARK_DOWNLOADING)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .context("failed to mark account downloading")?;
        Ok(())
    }

    /// Persist a freshly issued bearer token for the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn save_account_token(&self, account_id: &str, token: &str) -> Result<()> {
        sqlx::query(SAVE_TOKEN)
            .bind(account_id)
            .bind(token)
            .execute(&self.pool)
            .await
            .context("failed to save account token")?;
        Ok(())
    }

    /// Load one account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn fetch_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(FETCH_ACCOUNT)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch account")?;
        Ok(row.map(Account::from))
    }

    /// Reclaim every account lease whose owner has no heartbeat at or after
    /// `threshold`. Locked and uploading accounts fall back to downloading
    /// (their payload already sits in the cache and can be re-polled);
    /// processing accounts revert to idle. Returns the number of accounts
    /// released.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn release_orphaned_accounts(&self, threshold: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(RELEASE_ORPHANED_ACCOUNTS)
            .bind(threshold)
            .execute(&self.pool)
            .await
            .context("failed to release orphaned accounts")?;
        Ok(result.rows_affected())
    }
}
