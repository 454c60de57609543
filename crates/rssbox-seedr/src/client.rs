use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SeedrError};
use crate::listing::{self, SeedrListing};

/// Production endpoint of the torrent cache.
pub const DEFAULT_BASE_URL: &str = "https://www.seedr.cc";

const TOKEN_PATH: &str = "/oauth_test/token.php";
const RESOURCE_PATH: &str = "/oauth_test/resource.php";
const CLIENT_ID: &str = "seedr_chrome";

/// Receiver for freshly issued bearer tokens.
///
/// The cache rotates tokens at its own pace; whenever the client obtains a
/// new one it hands it to the sink before the retried call returns, so the
/// credential store never lags behind the token actually in use.
#[async_trait]
pub trait TokenSink: Send + Sync {
    /// Persist `token` as the current credential for `account_id`.
    async fn token_refreshed(&self, account_id: &str, token: &str);
}

/// Client for one account on the torrent cache.
pub struct SeedrClient {
    http: Client,
    base: Url,
    account_id: String,
    token: RwLock<String>,
    sink: Arc<dyn TokenSink>,
}

/// Parsed response of the `add_torrent` RPC.
#[derive(Debug, Clone)]
pub struct AddTorrentOutcome {
    /// Application-level status code reported by the cache.
    pub code: i64,
    /// Canonical name assigned to the torrent when it was accepted.
    pub title: Option<String>,
    /// Error message when the submission was rejected.
    pub message: Option<String>,
    accepted: bool,
}

impl AddTorrentOutcome {
    fn from_value(payload: &Value) -> Self {
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        let accepted =
            code == 200 && matches!(payload.get("result"), Some(Value::Bool(true)));
        let title = payload
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = payload
            .get("error")
            .or_else(|| payload.get("result"))
            .filter(|value| !value.is_null())
            .map(render);
        Self {
            code,
            title,
            message,
            accepted,
        }
    }

    /// Whether the cache accepted the torrent.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.accepted
    }
}

fn render(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

impl SeedrClient {
    /// Build a client for `account_id` holding `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` cannot address the RPC endpoints.
    pub fn new(
        http: Client,
        base: Url,
        account_id: impl Into<String>,
        token: impl Into<String>,
        sink: Arc<dyn TokenSink>,
    ) -> Result<Self> {
        // Validate eagerly so later calls cannot fail on URL assembly.
        endpoint(&base, RESOURCE_PATH, "new")?;
        Ok(Self {
            http,
            base,
            account_id: account_id.into(),
            token: RwLock::new(token.into()),
            sink,
        })
    }

    /// Exchange a username and password for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response carries no
    /// token.
    pub async fn login(
        http: &Client,
        base: &Url,
        username: &str,
        password: &str,
    ) -> Result<String> {
        info!(account = %username, "authenticating against the torrent cache");
        let url = endpoint(base, TOKEN_PATH, "login")?;
        let response = http
            .post(url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", CLIENT_ID),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await
            .map_err(|source| SeedrError::Http {
                operation: "login",
                source,
            })?;
        token_from_response("login", response).await
    }

    /// The bearer token currently in use.
    pub async fn token(&self) -> String {
        self.token.read().await.clone()
    }

    /// List the account workspace, or the contents of one folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the payload is malformed.
    pub async fn list_contents(&self, folder_id: Option<i64>) -> Result<SeedrListing> {
        let mut form = Vec::new();
        if let Some(folder_id) = folder_id {
            form.push(("content_id", folder_id.to_string()));
        }
        let payload = self.resource("list_contents", form).await?;
        listing::decode("list_contents", &payload)
    }

    /// Submit a torrent URL to the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the request itself fails; a rejected submission
    /// is a successful call with `accepted() == false`.
    pub async fn add_torrent(&self, url: &str) -> Result<AddTorrentOutcome> {
        let payload = self
            .resource("add_torrent", vec![("torrent_magnet", url.to_string())])
            .await?;
        Ok(AddTorrentOutcome::from_value(&payload))
    }

    /// Resolve a short-lived download URL for one cached file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no URL comes back.
    pub async fn fetch_file(&self, file_id: i64) -> Result<String> {
        let payload = self
            .resource("fetch_file", vec![("folder_file_id", file_id.to_string())])
            .await?;
        payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SeedrError::Malformed {
                operation: "fetch_file",
                detail: "missing or unreadable key `url`".to_string(),
            })
    }

    /// Delete one folder from the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_folder(&self, folder_id: i64) -> Result<()> {
        self.resource("delete_folder", vec![("folder_id", folder_id.to_string())])
            .await
            .map(|_| ())
    }

    /// Delete one file from the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        self.resource("delete_file", vec![("folder_file_id", file_id.to_string())])
            .await
            .map(|_| ())
    }

    /// Delete one torrent, finished or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_torrent(&self, torrent_id: i64) -> Result<()> {
        self.resource("delete_torrent", vec![("torrent_id", torrent_id.to_string())])
            .await
            .map(|_| ())
    }

    /// Delete everything in the workspace. Accounts are pooled, so every
    /// submission starts from a clean slate.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing or any delete fails.
    pub async fn purge(&self) -> Result<()> {
        let listing = self.list_contents(None).await?;
        debug!(
            account = %self.account_id,
            folders = listing.folders.len(),
            files = listing.files.len(),
            torrents = listing.torrents.len(),
            "purging account workspace"
        );
        for folder in &listing.folders {
            self.delete_folder(folder.id).await?;
        }
        for file in &listing.files {
            self.delete_file(file.id).await?;
        }
        for torrent in &listing.torrents {
            self.delete_torrent(torrent.id).await?;
        }
        Ok(())
    }

    async fn resource(
        &self,
        operation: &'static str,
        form: Vec<(&'static str, String)>,
    ) -> Result<Value> {
        let response = self.call(operation, &form).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(account = %self.account_id, operation, "bearer token expired, refreshing");
            self.refresh().await?;
            let retried = self.call(operation, &form).await?;
            return read_json(operation, retried).await;
        }
        read_json(operation, response).await
    }

    async fn call(
        &self,
        operation: &'static str,
        form: &[(&'static str, String)],
    ) -> Result<reqwest::Response> {
        let mut url = endpoint(&self.base, RESOURCE_PATH, operation)?;
        url.query_pairs_mut().append_pair("func", operation);

        let token = self.token().await;
        let mut body: Vec<(&str, &str)> = vec![("access_token", token.as_str())];
        body.extend(form.iter().map(|(key, value)| (*key, value.as_str())));

        self.http
            .post(url)
            .form(&body)
            .send()
            .await
            .map_err(|source| SeedrError::Http { operation, source })
    }

    async fn refresh(&self) -> Result<()> {
        let url = endpoint(&self.base, TOKEN_PATH, "refresh_token")?;
        let current = self.token().await;
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", CLIENT_ID),
                ("refresh_token", current.as_str()),
            ])
            .send()
            .await
            .map_err(|source| SeedrError::Http {
                operation: "refresh_token",
                source,
            })?;
        let token = token_from_response("refresh_token", response).await?;

        *self.token.write().await = token.clone();
        self.sink.token_refreshed(&self.account_id, &token).await;
        info!(account = %self.account_id, "bearer token refreshed");
        Ok(())
    }
}

fn endpoint(base: &Url, path: &str, operation: &'static str) -> Result<Url> {
    base.join(path).map_err(|err| SeedrError::Malformed {
        operation,
        detail: format!("cannot build endpoint url: {err}"),
    })
}

async fn read_json(operation: &'static str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(SeedrError::Status {
            operation,
            status: status.as_u16(),
        });
    }
    response
        .json()
        .await
        .map_err(|source| SeedrError::Http { operation, source })
}

async fn token_from_response(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<String> {
    let payload = read_json(operation, response).await?;
    payload
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SeedrError::Malformed {
            operation,
            detail: "missing or unreadable key `access_token`".to_string(),
        })
}
