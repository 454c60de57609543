//! Typed views of the coordination tables.

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A download whose retry counter reaches this value is dropped from the
/// queue instead of being re-queued.
pub const RETRY_LIMIT: i64 = 5;

/// Lifecycle of a pooled torrent-cache account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Free for any worker to acquire.
    Idle,
    /// Reserved by a worker; submission to the cache not yet confirmed.
    Processing,
    /// A download sits in the cache; nobody holds the account.
    Downloading,
    /// A worker holds the account while polling the cache.
    Locked,
    /// A worker holds the account while streaming files out.
    Uploading,
}

impl AccountStatus {
    /// Stored label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Processing => "PROCESSING",
            Self::Downloading => "DOWNLOADING",
            Self::Locked => "LOCKED",
            Self::Uploading => "UPLOADING",
        }
    }

    /// Decode a stored label. Accounts provisioned by hand may carry an
    /// empty status; those are treated as idle, as is any unknown label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "IDLE" | "" => Self::Idle,
            "PROCESSING" => Self::Processing,
            "DOWNLOADING" => Self::Downloading,
            "LOCKED" => Self::Locked,
            "UPLOADING" => Self::Uploading,
            other => {
                tracing::warn!(status = %other, "unknown account status in store");
                Self::Idle
            }
        }
    }
}

/// Lifecycle of a queued download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Waiting for a worker to claim it.
    Pending,
    /// Accepted by the torrent cache; an account is driving it.
    Processing,
    /// All files delivered to the object store.
    Completed,
    /// The cache never produced the files in time.
    Timeout,
    /// Failed without a retry path.
    Error,
}

impl DownloadStatus {
    /// Stored label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }

    /// Decode a stored label; unknown labels degrade to pending so the row
    /// re-enters the queue rather than wedging.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "PENDING" => Self::Pending,
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "TIMEOUT" => Self::Timeout,
            "ERROR" => Self::Error,
            other => {
                tracing::warn!(status = %other, "unknown download status in store");
                Self::Pending
            }
        }
    }
}

/// One pooled credential on the remote torrent cache.
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable account identifier (the cache username).
    pub id: String,
    /// Password used for the first login when no token is stored yet.
    pub password: Option<String>,
    /// Current bearer token; rewritten by the refresh callback.
    pub token: Option<String>,
    /// Position in the account state machine.
    pub status: AccountStatus,
    /// Worker holding the lease, when the status is a locked state.
    pub locked_by: Option<String>,
    /// Download currently assigned to this account.
    pub download_id: Option<Uuid>,
    /// When the current download was submitted to the cache.
    pub added_at: Option<DateTime<Utc>>,
    /// When a worker last polled the cache for this account.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Scheduling priority, higher served first.
    pub priority: i64,
}

impl Account {
    /// Whether the assigned download has been sitting in the cache longer
    /// than `timeout`. The boundary is exclusive: a download exactly at the
    /// limit has not yet timed out.
    #[must_use]
    pub fn download_timed_out(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        self.added_at
            .is_some_and(|added_at| added_at + timeout < now)
    }

    /// Time spent in the cache so far, for progress logging.
    #[must_use]
    pub fn time_in_cache(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.added_at.map(|added_at| now - added_at)
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AccountRow {
    pub(crate) id: String,
    pub(crate) password: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) status: String,
    pub(crate) locked_by: Option<String>,
    pub(crate) download_id: Option<Uuid>,
    pub(crate) added_at: Option<DateTime<Utc>>,
    pub(crate) last_checked_at: Option<DateTime<Utc>>,
    pub(crate) priority: i64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            password: row.password,
            token: row.token,
            status: AccountStatus::from_label(&row.status),
            locked_by: row.locked_by,
            download_id: row.download_id,
            added_at: row.added_at,
            last_checked_at: row.last_checked_at,
            priority: row.priority,
        }
    }
}

/// One queue entry, from feed announcement to object-store delivery.
#[derive(Debug, Clone)]
pub struct Download {
    /// Row identifier.
    pub id: Uuid,
    /// Torrent source URL; unique across the queue's whole history.
    pub url: String,
    /// Title taken from the feed entry.
    pub name: String,
    /// Position in the download state machine.
    pub status: DownloadStatus,
    /// Canonical name the cache assigned on acceptance.
    pub download_name: Option<String>,
    /// Worker holding a transient claim on the row.
    pub locked_by: Option<String>,
    /// Hard-failure count; [`RETRY_LIMIT`] deletes the row.
    pub retries: i64,
}

#[derive(Debug, FromRow)]
pub(crate) struct DownloadRow {
    pub(crate) id: Uuid,
    pub(crate) url: String,
    pub(crate) name: String,
    pub(crate) status: String,
    pub(crate) download_name: Option<String>,
    pub(crate) locked_by: Option<String>,
    pub(crate) retries: i64,
}

impl From<DownloadRow> for Download {
    fn from(row: DownloadRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            name: row.name,
            status: DownloadStatus::from_label(&row.status),
            download_name: row.download_name,
            locked_by: row.locked_by,
            retries: row.retries,
        }
    }
}

/// Liveness record for one running worker process.
#[derive(Debug, Clone, FromRow)]
pub struct Worker {
    /// Worker identifier, 16 hex digits.
    pub id: String,
    /// Last time the worker proved it was alive.
    pub last_heartbeat: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_status_round_trips() {
        for status in [
            AccountStatus::Idle,
            AccountStatus::Processing,
            AccountStatus::Downloading,
            AccountStatus::Locked,
            AccountStatus::Uploading,
        ] {
            assert_eq!(AccountStatus::from_label(status.as_str()), status);
        }
    }

    #[test]
    fn blank_and_unknown_account_labels_degrade_to_idle() {
        assert_eq!(AccountStatus::from_label(""), AccountStatus::Idle);
        assert_eq!(AccountStatus::from_label("BOGUS"), AccountStatus::Idle);
    }

    #[test]
    fn download_status_round_trips() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Processing,
            DownloadStatus::Completed,
            DownloadStatus::Timeout,
            DownloadStatus::Error,
        ] {
            assert_eq!(DownloadStatus::from_label(status.as_str()), status);
        }
    }

    fn account_added_at(added_at: Option<DateTime<Utc>>) -> Account {
        Account {
            id: "acct".to_string(),
            password: None,
            token: None,
            status: AccountStatus::Downloading,
            locked_by: None,
            download_id: Some(Uuid::new_v4()),
            added_at,
            last_checked_at: None,
            priority: 0,
        }
    }

    #[test]
    fn timeout_boundary_is_exclusive() {
        let timeout = TimeDelta::seconds(9000);
        let now = Utc::now();

        let at_limit = account_added_at(Some(now - timeout));
        assert!(!at_limit.download_timed_out(now, timeout));

        let past_limit = account_added_at(Some(now - timeout - TimeDelta::seconds(1)));
        assert!(past_limit.download_timed_out(now, timeout));

        let never_added = account_added_at(None);
        assert!(!never_added.download_timed_out(now, timeout));
    }
}
