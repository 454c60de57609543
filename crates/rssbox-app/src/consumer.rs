//! Feed consumer that fills the download queue.

use anyhow::Result;
use async_trait::async_trait;
use rssbox_data::Store;
use rssbox_feed::{EntryConsumer, FeedEntry};
use tracing::{debug, error, info};

/// Inserts every delivered feed entry into the shared download queue.
///
/// Individual insert failures are logged and skipped; the batch is still
/// acknowledged, because the unique URL constraint makes a replayed entry
/// harmless.
pub(crate) struct QueueConsumer {
    pub(crate) store: Store,
}

#[async_trait]
impl EntryConsumer for QueueConsumer {
    async fn deliver(&self, entries: &[FeedEntry]) -> Result<bool> {
        info!(count = entries.len(), "new feed entries");
        for entry in entries {
            match self.store.insert_download(&entry.link, &entry.title).await {
                Ok(true) => debug!(title = %entry.title, "queued download"),
                Ok(false) => debug!(title = %entry.title, "duplicate feed entry ignored"),
                Err(err) => {
                    error!(title = %entry.title, error = %err, "failed to queue feed entry");
                }
            }
        }
        Ok(true)
    }
}
