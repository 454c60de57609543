//! The per-worker account pipeline.
//!
//! `begin_download` drains the pending queue into free accounts;
//! `check_downloads` polls accounts whose payload sits in the cache and
//! streams finished files out. Both phases re-read authoritative state from
//! the store on every step and never cache a lease across calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use reqwest::Client;
use rssbox_data::{Account, Download, FailureDisposition, Store};
use rssbox_seedr::{SeedrClient, SeedrItem, TokenSink};
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};
use url::Url;

use crate::failure::{FailureKind, transport_failure};
use crate::files::FileHandler;
use crate::scheduler::Scheduler;

/// How often a worker drains the pending queue into free accounts.
pub const BEGIN_DOWNLOAD_INTERVAL: Duration = Duration::from_secs(30);

/// A check pass ends after this many completed deliveries.
const CHECK_COMPLETION_LIMIT: u32 = 3;
/// ... or after this much wall clock, whichever comes first, so the
/// scheduler gets the call site back.
const CHECK_WALL_CLOCK_BUDGET: Duration = Duration::from_secs(8 * 60);
/// A download sitting in the cache longer than this (2.5 h) is abandoned
/// and re-queued.
const DOWNLOAD_TIMEOUT_SECS: i64 = 9000;
/// Pause between polls while the cache is still assembling a torrent.
const ASSEMBLY_PAUSE: Duration = Duration::from_secs(5);

/// Persists refreshed bearer tokens straight back into the account row.
struct StoreTokenSink {
    store: Store,
}

#[async_trait]
impl TokenSink for StoreTokenSink {
    async fn token_refreshed(&self, account_id: &str, token: &str) {
        if let Err(err) = self.store.save_account_token(account_id, token).await {
            warn!(account = %account_id, error = %err, "failed to persist refreshed token");
        }
    }
}

/// Drives pooled accounts through the download/upload state machine on
/// behalf of one worker.
#[derive(Clone)]
pub struct AccountPipeline {
    worker_id: String,
    store: Store,
    files: FileHandler,
    http: Client,
    seedr_base: Url,
}

impl AccountPipeline {
    /// Build the pipeline for `worker_id`.
    #[must_use]
    pub const fn new(
        worker_id: String,
        store: Store,
        files: FileHandler,
        http: Client,
        seedr_base: Url,
    ) -> Self {
        Self {
            worker_id,
            store,
            files,
            http,
            seedr_base,
        }
    }

    /// Pair pending downloads with free accounts until either runs out.
    ///
    /// A claimed download that cannot be submitted is always unlocked
    /// again, and the account returned to the pool, so the pair can be
    /// retried, here or by another worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn begin_download(&self) -> Result<()> {
        loop {
            let Some(download) = self.store.claim_pending_download(&self.worker_id).await? else {
                break;
            };
            let Some(account) = self.store.acquire_free_account(&self.worker_id).await? else {
                info!("no free accounts available");
                self.store.unlock_download(download.id).await?;
                break;
            };
            if let Err(err) = self.submit(&account, &download).await {
                error!(
                    download = %download.name,
                    account = %account.id,
                    error = %err,
                    "cache submission failed"
                );
                self.store.mark_account_idle(&account.id).await?;
                self.store.unlock_download(download.id).await?;
            }
        }
        Ok(())
    }

    async fn submit(&self, account: &Account, download: &Download) -> Result<()> {
        let seedr = self.seedr_for(account).await?;
        // Accounts are pooled; whatever a previous tenant left behind goes.
        seedr.purge().await?;

        let outcome = seedr.add_torrent(&download.url).await?;
        if !outcome.accepted() {
            return Err(anyhow!(
                "cache rejected the torrent: {}",
                outcome
                    .message
                    .unwrap_or_else(|| format!("code {}", outcome.code))
            ));
        }

        self.store
            .begin_downloading(&account.id, download.id, outcome.title.as_deref(), Utc::now())
            .await?;
        info!(
            download = %download.name,
            account = %account.id,
            cache_name = outcome.title.as_deref().unwrap_or(""),
            "torrent added to cache"
        );
        Ok(())
    }

    /// Poll accounts with cached payloads, streaming finished files to the
    /// object store. Self-terminates after three completed deliveries or
    /// eight minutes, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure that is not a recognised transport
    /// failure; the current lease stays put and the reaper reclaims it.
    pub async fn check_downloads(&self) -> Result<()> {
        let started = Instant::now();
        let mut remaining = CHECK_COMPLETION_LIMIT;

        while remaining > 0 && started.elapsed() <= CHECK_WALL_CLOCK_BUDGET {
            let Some(account) = self
                .store
                .lease_downloading_account(&self.worker_id, Utc::now())
                .await?
            else {
                break;
            };

            let Some(download) = self.download_for(&account).await? else {
                info!(
                    account = %account.id,
                    "leased account has no download row, returning it to the pool"
                );
                self.store.mark_account_idle(&account.id).await?;
                continue;
            };
            let Some(download_name) = download.download_name.clone() else {
                info!(
                    account = %account.id,
                    download = %download.name,
                    "cache never named the download, resetting the pair"
                );
                self.store.reset_pair(&account.id, download.id).await?;
                continue;
            };

            let seedr = self.seedr_for(&account).await?;
            let listing = seedr.list_contents(None).await?;

            if let Some(item) = listing.find(&download_name) {
                if self.deliver(&seedr, &account, &download, &item).await? {
                    remaining -= 1;
                }
            } else if account.download_timed_out(Utc::now(), TimeDelta::seconds(DOWNLOAD_TIMEOUT_SECS))
            {
                info!(
                    download = %download.name,
                    account = %account.id,
                    "download timed out, resetting the pair"
                );
                self.store.reset_pair(&account.id, download.id).await?;
            } else if let Some(torrent) = listing.torrent_named(&download_name) {
                let elapsed_secs = account
                    .time_in_cache(Utc::now())
                    .map_or(0, |delta| delta.num_seconds());
                info!(
                    download = %download.name,
                    account = %account.id,
                    progress = torrent.progress,
                    elapsed_secs,
                    "torrent still assembling in the cache"
                );
                self.store.mark_account_downloading(&account.id).await?;
                sleep(ASSEMBLY_PAUSE).await;
            } else {
                warn!(
                    download = %download.name,
                    account = %account.id,
                    "torrent vanished from the cache, resetting the pair"
                );
                self.store.reset_pair(&account.id, download.id).await?;
            }
        }
        Ok(())
    }

    async fn deliver(
        &self,
        seedr: &SeedrClient,
        account: &Account,
        download: &Download,
        item: &SeedrItem,
    ) -> Result<bool> {
        info!(
            download = %download.name,
            account = %account.id,
            "download finished in the cache"
        );
        self.store
            .mark_account_uploading(&account.id, &self.worker_id)
            .await?;

        match self.files.upload(seedr, item).await {
            Ok(0) => {
                info!(
                    download = %download.name,
                    "no files passed the filter yet, re-polling"
                );
                self.store.mark_account_downloading(&account.id).await?;
                sleep(ASSEMBLY_PAUSE).await;
                Ok(false)
            }
            Ok(count) => {
                self.store.complete_pair(&account.id, download.id).await?;
                info!(download = %download.name, files = count, "delivery complete");
                Ok(true)
            }
            Err(err) => match transport_failure(&err) {
                Some(kind) => {
                    let soft = kind == FailureKind::Soft;
                    error!(
                        download = %download.name,
                        account = %account.id,
                        error = %err,
                        soft,
                        "upload failed"
                    );
                    let disposition = self.store.fail_pair(&account.id, download, soft).await?;
                    if disposition == FailureDisposition::Dropped {
                        warn!(
                            download = %download.name,
                            "retry budget exhausted, dropping download"
                        );
                    }
                    Ok(false)
                }
                None => Err(err),
            },
        }
    }

    async fn download_for(&self, account: &Account) -> Result<Option<Download>> {
        match account.download_id {
            Some(download_id) => self.store.find_download(download_id).await,
            None => Ok(None),
        }
    }

    // Accounts provisioned with only a password are logged in once; the
    // token is persisted for every later pass, on this worker or any other.
    async fn seedr_for(&self, account: &Account) -> Result<SeedrClient> {
        let token = match &account.token {
            Some(token) => token.clone(),
            None => {
                let password = account.password.as_deref().ok_or_else(|| {
                    anyhow!("account {} has neither token nor password", account.id)
                })?;
                let token =
                    SeedrClient::login(&self.http, &self.seedr_base, &account.id, password).await?;
                self.store.save_account_token(&account.id, &token).await?;
                token
            }
        };

        Ok(SeedrClient::new(
            self.http.clone(),
            self.seedr_base.clone(),
            &account.id,
            token,
            Arc::new(StoreTokenSink {
                store: self.store.clone(),
            }),
        )?)
    }

    /// Register the periodic queue-drain job on `scheduler`.
    pub fn schedule(&self, scheduler: &Scheduler) {
        let pipeline = self.clone();
        scheduler.add_interval_job("begin-download", BEGIN_DOWNLOAD_INTERVAL, move || {
            let pipeline = pipeline.clone();
            async move {
                if let Err(err) = pipeline.begin_download().await {
                    warn!(error = %err, "begin-download pass failed");
                }
            }
        });
    }
}
