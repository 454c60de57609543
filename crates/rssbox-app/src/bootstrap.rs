//! Dependency wiring and the worker run sequence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use reqwest::Client;
use rssbox_config::Settings;
use rssbox_data::Store;
use rssbox_drive::DriveClient;
use rssbox_feed::FeedWatcher;
use rssbox_worker::{
    AccountPipeline, FileHandler, Heartbeat, LeaseReaper, Scheduler, generate_worker_id,
};
use tracing::{error, info};
use url::Url;

use crate::cli::Cli;
use crate::consumer::QueueConsumer;
use crate::logging;

const FEED_POLL_INTERVAL: Duration = Duration::from_secs(60);

type AppFeedWatcher = FeedWatcher<Store, QueueConsumer>;

/// Run one worker process to completion.
///
/// # Errors
///
/// Returns an error on unrecoverable startup failures (missing environment,
/// unreachable store) and on pipeline failures that are not handled
/// in-band; either way the process exits non-zero.
pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env(cli.wants_debug())?;

    tokio::fs::create_dir_all(&settings.download_path)
        .await
        .with_context(|| {
            format!(
                "failed to create scratch directory {}",
                settings.download_path.display()
            )
        })?;
    logging::init(&settings)?;

    let store = Store::connect(&settings.database_url).await?;
    let worker_id = generate_worker_id();
    info!(worker = %worker_id, "worker starting");

    let scheduler = Arc::new(Scheduler::new());
    let http = Client::new();

    // Reclaim anything a previous tenant of this store left behind before
    // taking on new work.
    let reaper = LeaseReaper::new(store.clone());
    reaper.run_once(Utc::now()).await?;
    reaper.schedule(&scheduler);

    let watcher: Arc<AppFeedWatcher> = Arc::new(FeedWatcher::new(
        http.clone(),
        settings.rss_url.clone(),
        store.clone(),
        QueueConsumer {
            store: store.clone(),
        },
        true,
    ));
    if let Err(err) = watcher.check().await {
        error!(error = %err, "initial feed poll failed");
    }
    schedule_feed_polls(&scheduler, Arc::clone(&watcher));

    let drive = DriveClient::new(http.clone(), &settings.deta_key)?;
    let files = FileHandler::new(http.clone(), drive, settings.clone());
    let seedr_base: Url = rssbox_seedr::DEFAULT_BASE_URL
        .parse()
        .context("invalid torrent cache base url")?;
    let pipeline = AccountPipeline::new(
        worker_id.clone(),
        store.clone(),
        files,
        http,
        seedr_base,
    );

    let heartbeat = Heartbeat::new(worker_id, store, Arc::clone(&scheduler));
    heartbeat.start().await?;

    let outcome = run_pipeline(&pipeline, &scheduler).await;

    // The heartbeat scope ends on every path, success or not, so a clean
    // shutdown never leans on the reaper.
    heartbeat.stop().await;
    scheduler.shutdown();
    info!("worker stopped");
    outcome
}

async fn run_pipeline(pipeline: &AccountPipeline, scheduler: &Scheduler) -> Result<()> {
    pipeline.begin_download().await?;
    pipeline.schedule(scheduler);
    pipeline.check_downloads().await?;
    pipeline.begin_download().await?;
    Ok(())
}

fn schedule_feed_polls(scheduler: &Scheduler, watcher: Arc<AppFeedWatcher>) {
    scheduler.add_interval_job("feed-watch", FEED_POLL_INTERVAL, move || {
        let watcher = Arc::clone(&watcher);
        async move {
            if let Err(err) = watcher.check().await {
                error!(error = %err, "feed poll failed");
            }
        }
    });
}
