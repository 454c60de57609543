use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, error, warn};

/// One feed entry worth queueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Torrent source URL announced by the feed.
    pub link: String,
    /// Entry title.
    pub title: String,
    /// Publication time in UTC.
    pub published: DateTime<Utc>,
}

/// Receiver for batches of fresh feed entries.
#[async_trait]
pub trait EntryConsumer: Send + Sync {
    /// Handle a batch. The returned flag is the delivery acknowledgement:
    /// when confirmation checking is enabled, `false` keeps the watermark
    /// where it is and the batch is re-delivered on the next poll.
    ///
    /// # Errors
    ///
    /// May fail; failures never advance the watermark.
    async fn deliver(&self, entries: &[FeedEntry]) -> Result<bool>;
}

/// Persistence seam for the per-feed watermark.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the watermark for `feed_id`, creating it at `now` when the feed
    /// has never been observed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn ensure(&self, feed_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Advance the watermark to `to`; regressions must be ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn advance(&self, feed_id: &str, to: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl WatermarkStore for rssbox_data::Store {
    async fn ensure(&self, feed_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.ensure_watermark(feed_id, now).await
    }

    async fn advance(&self, feed_id: &str, to: DateTime<Utc>) -> Result<()> {
        self.advance_watermark(feed_id, to).await
    }
}

/// Polls one RSS feed and forwards fresh entries to a consumer.
pub struct FeedWatcher<S, C> {
    http: Client,
    url: String,
    feed_id: String,
    store: S,
    consumer: C,
    check_confirmation: bool,
}

impl<S, C> FeedWatcher<S, C>
where
    S: WatermarkStore,
    C: EntryConsumer,
{
    /// Build a watcher for `url`. The feed key in the store defaults to the
    /// URL itself.
    pub fn new(http: Client, url: String, store: S, consumer: C, check_confirmation: bool) -> Self {
        let feed_id = url.clone();
        Self {
            http,
            url,
            feed_id,
            store,
            consumer,
            check_confirmation,
        }
    }

    /// Run one poll: fetch, filter against the watermark, deliver, and
    /// advance the watermark past the delivered batch.
    ///
    /// Consumer failures are logged here and never propagate; the watermark
    /// stays put so the next poll re-delivers the same batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be fetched or parsed, or the
    /// watermark store is unreachable.
    pub async fn check(&self) -> Result<()> {
        let watermark = self.store.ensure(&self.feed_id, Utc::now()).await?;

        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("failed to fetch feed")?
            .error_for_status()
            .context("feed endpoint returned an error status")?
            .bytes()
            .await
            .context("failed to read feed body")?;

        let entries = parse_feed(&body)?;
        let fresh: Vec<FeedEntry> = entries
            .into_iter()
            .filter(|entry| entry.published > watermark)
            .collect();
        debug!(feed = %self.feed_id, count = fresh.len(), "fresh feed entries");

        let Some(newest) = newest_published(&fresh) else {
            return Ok(());
        };

        match self.consumer.deliver(&fresh).await {
            Ok(confirmed) => {
                if confirmed || !self.check_confirmation {
                    self.store.advance(&self.feed_id, newest).await?;
                } else {
                    warn!(
                        feed = %self.feed_id,
                        "consumer declined the batch, keeping watermark"
                    );
                }
            }
            Err(err) => {
                error!(
                    feed = %self.feed_id,
                    error = %err,
                    "consumer failed, keeping watermark"
                );
            }
        }
        Ok(())
    }
}

fn parse_feed(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let channel = rss::Channel::read_from(body).context("failed to parse feed document")?;
    Ok(channel
        .items()
        .iter()
        .filter_map(entry_from_item)
        .collect())
}

// Entries without a link, title or parseable publication date cannot be
// queued or deduplicated; they are skipped.
fn entry_from_item(item: &rss::Item) -> Option<FeedEntry> {
    let link = item.link()?.to_string();
    let title = item.title()?.to_string();
    let published = item
        .pub_date()
        .and_then(|date| DateTime::parse_from_rfc2822(date).ok())?
        .with_timezone(&Utc);
    Some(FeedEntry {
        link,
        title,
        published,
    })
}

// Feeds are usually newest-first, but nothing guarantees it; the watermark
// advances past the newest publication time actually seen in the batch.
fn newest_published(entries: &[FeedEntry]) -> Option<DateTime<Utc>> {
    entries.iter().map(|entry| entry.published).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::sync::Mutex;

    const FEED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>releases</title>
    <link>https://releases.example</link>
    <description>releases</description>
    <item>
      <title>Older Movie</title>
      <link>magnet:?xt=urn:btih:older</link>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Newest Movie</title>
      <link>magnet:?xt=urn:btih:newest</link>
      <pubDate>Wed, 01 May 2024 14:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated Movie</title>
      <link>magnet:?xt=urn:btih:undated</link>
    </item>
  </channel>
</rss>"#;

    struct MemoryStore {
        mark: Mutex<Option<DateTime<Utc>>>,
    }

    impl MemoryStore {
        fn starting_at(mark: DateTime<Utc>) -> Self {
            Self {
                mark: Mutex::new(Some(mark)),
            }
        }

        fn mark(&self) -> Option<DateTime<Utc>> {
            *self.mark.lock().expect("store lock")
        }
    }

    #[async_trait]
    impl WatermarkStore for &MemoryStore {
        async fn ensure(&self, _feed_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
            let mut mark = self.mark.lock().expect("store lock");
            Ok(*mark.get_or_insert(now))
        }

        async fn advance(&self, _feed_id: &str, to: DateTime<Utc>) -> Result<()> {
            let mut mark = self.mark.lock().expect("store lock");
            if mark.is_none_or(|current| current < to) {
                *mark = Some(to);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingConsumer {
        batches: Mutex<Vec<Vec<FeedEntry>>>,
        decline: bool,
        fail: bool,
    }

    #[async_trait]
    impl EntryConsumer for &RecordingConsumer {
        async fn deliver(&self, entries: &[FeedEntry]) -> Result<bool> {
            if self.fail {
                anyhow::bail!("simulated consumer failure");
            }
            self.batches
                .lock()
                .expect("consumer lock")
                .push(entries.to_vec());
            Ok(!self.decline)
        }
    }

    fn utc(rfc3339: &str) -> DateTime<Utc> {
        rfc3339.parse().expect("valid timestamp")
    }

    #[test]
    fn parser_skips_entries_without_dates() -> Result<()> {
        let entries = parse_feed(FEED_XML.as_bytes())?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Older Movie");
        assert_eq!(entries[1].link, "magnet:?xt=urn:btih:newest");
        Ok(())
    }

    #[test]
    fn newest_published_takes_the_max_not_the_first() -> Result<()> {
        let entries = parse_feed(FEED_XML.as_bytes())?;
        assert_eq!(newest_published(&entries), Some(utc("2024-05-01T14:00:00Z")));
        assert_eq!(newest_published(&[]), None);
        Ok(())
    }

    async fn serve_feed() -> (MockServer, String) {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/feed.xml");
            then.status(200).body(FEED_XML);
        });
        let url = server.url("/feed.xml");
        (server, url)
    }

    #[tokio::test]
    async fn delivers_fresh_entries_and_advances_past_the_batch() -> Result<()> {
        let (_server, url) = serve_feed().await;
        let store = MemoryStore::starting_at(utc("2024-05-01T09:00:00Z"));
        let consumer = RecordingConsumer::default();

        let watcher = FeedWatcher::new(Client::new(), url, &store, &consumer, true);
        watcher.check().await?;

        let batches = consumer.batches.lock().expect("consumer lock");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(store.mark(), Some(utc("2024-05-01T14:00:00Z")));
        Ok(())
    }

    #[tokio::test]
    async fn watermark_filters_already_seen_entries() -> Result<()> {
        let (_server, url) = serve_feed().await;
        let store = MemoryStore::starting_at(utc("2024-05-01T12:00:00Z"));
        let consumer = RecordingConsumer::default();

        let watcher = FeedWatcher::new(Client::new(), url, &store, &consumer, true);
        watcher.check().await?;

        let batches = consumer.batches.lock().expect("consumer lock");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].title, "Newest Movie");
        Ok(())
    }

    #[tokio::test]
    async fn declined_confirmation_keeps_the_watermark() -> Result<()> {
        let (_server, url) = serve_feed().await;
        let start = utc("2024-05-01T09:00:00Z");
        let store = MemoryStore::starting_at(start);
        let consumer = RecordingConsumer {
            decline: true,
            ..RecordingConsumer::default()
        };

        let watcher = FeedWatcher::new(Client::new(), url, &store, &consumer, true);
        watcher.check().await?;
        assert_eq!(store.mark(), Some(start));

        // Re-delivery on the next poll.
        watcher.check().await?;
        assert_eq!(consumer.batches.lock().expect("consumer lock").len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn consumer_failure_is_swallowed_and_redelivered() -> Result<()> {
        let (_server, url) = serve_feed().await;
        let start = utc("2024-05-01T09:00:00Z");
        let store = MemoryStore::starting_at(start);
        let consumer = RecordingConsumer {
            fail: true,
            ..RecordingConsumer::default()
        };

        let watcher = FeedWatcher::new(Client::new(), url, &store, &consumer, true);
        watcher.check().await?;
        assert_eq!(store.mark(), Some(start));
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_checking_disabled_always_advances() -> Result<()> {
        let (_server, url) = serve_feed().await;
        let store = MemoryStore::starting_at(utc("2024-05-01T09:00:00Z"));
        let consumer = RecordingConsumer {
            decline: true,
            ..RecordingConsumer::default()
        };

        let watcher = FeedWatcher::new(Client::new(), url, &store, &consumer, false);
        watcher.check().await?;
        assert_eq!(store.mark(), Some(utc("2024-05-01T14:00:00Z")));
        Ok(())
    }
}
