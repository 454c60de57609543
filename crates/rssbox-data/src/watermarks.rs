//! Feed watermark persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::store::Store;

const INIT_WATERMARK: &str = r"
    INSERT INTO feed_watermarks (id, last_saved_on)
    VALUES ($1, $2)
    ON CONFLICT (id) DO NOTHING
";

const READ_WATERMARK: &str = r"
    SELECT last_saved_on FROM feed_watermarks WHERE id = $1
";

// Monotonic by construction: an older timestamp never overwrites a newer one.
const ADVANCE_WATERMARK: &str = r"
    UPDATE feed_watermarks
    SET last_saved_on = $2
    WHERE id = $1 AND last_saved_on < $2
";

impl Store {
    /// Read the watermark for `feed_id`, creating it at `now` on first
    /// observation of the feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or read fails.
    pub async fn ensure_watermark(
        &self,
        feed_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        sqlx::query(INIT_WATERMARK)
            .bind(feed_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("failed to initialise feed watermark")?;
        let row = sqlx::query(READ_WATERMARK)
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to read feed watermark")?;
        row.try_get("last_saved_on")
            .context("feed watermark row missing timestamp")
    }

    /// Advance the watermark to `to`. Regressions are ignored, keeping the
    /// watermark monotonic non-decreasing under concurrent pollers.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn advance_watermark(&self, feed_id: &str, to: DateTime<Utc>) -> Result<()> {
        sqlx::query(ADVANCE_WATERMARK)
            .bind(feed_id)
            .bind(to)
            .execute(&self.pool)
            .await
            .context("failed to advance feed watermark")?;
        Ok(())
    }
}
