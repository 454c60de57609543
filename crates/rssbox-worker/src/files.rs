//! Local scratch handling and object-store delivery for finished files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest::Client;
use rssbox_config::Settings;
use rssbox_drive::{DriveClient, FILES_TABLE, FileRecord, content_key};
use rssbox_seedr::{SeedrClient, SeedrFile, SeedrFolder, SeedrItem};
use size_format::SizeFormatterBinary;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Walks a finished cache entry, downloads every allow-listed leaf file to
/// local scratch and uploads it to the object store.
#[derive(Clone)]
pub struct FileHandler {
    http: Client,
    drive: DriveClient,
    settings: Settings,
}

impl FileHandler {
    /// Build a handler over the shared HTTP client and object store.
    #[must_use]
    pub const fn new(http: Client, drive: DriveClient, settings: Settings) -> Self {
        Self {
            http,
            drive,
            settings,
        }
    }

    /// Deliver every allow-listed file under `item`, depth first. Returns
    /// the number of files uploaded; zero means everything was filtered
    /// out.
    ///
    /// # Errors
    ///
    /// Returns an error when a listing, fetch, upload or scratch cleanup
    /// fails. The caller classifies transport failures.
    pub async fn upload(&self, seedr: &SeedrClient, item: &SeedrItem) -> Result<u32> {
        match item {
            SeedrItem::File(file) => self.process_file(seedr, file).await,
            SeedrItem::Folder(folder) => self.process_folder(seedr, folder).await,
        }
    }

    fn process_folder<'a>(
        &'a self,
        seedr: &'a SeedrClient,
        folder: &'a SeedrFolder,
    ) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move {
            let listing = seedr.list_contents(Some(folder.id)).await?;
            let mut uploaded = 0;
            for file in &listing.files {
                uploaded += self.process_file(seedr, file).await?;
            }
            for child in &listing.folders {
                uploaded += self.process_folder(seedr, child).await?;
            }
            Ok(uploaded)
        })
    }

    // Filter first: a rejected extension never costs an HTTP fetch.
    async fn process_file(&self, seedr: &SeedrClient, file: &SeedrFile) -> Result<u32> {
        if !self.settings.extension_allowed(&file.name) {
            debug!(file = %file.name, "extension not allow-listed, skipping");
            return Ok(0);
        }
        let path = self.download_file(seedr, file).await?;
        self.upload_file(file, &path).await?;
        Ok(1)
    }

    async fn download_file(&self, seedr: &SeedrClient, file: &SeedrFile) -> Result<PathBuf> {
        let dir = self.scratch_dir(file);
        let path = dir.join(&file.name);
        if already_present(&path, file.size).await {
            info!(file = %file.name, "scratch file already complete, skipping fetch");
            return Ok(path);
        }

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create scratch dir {}", dir.display()))?;

        let url = seedr.fetch_file(file.id).await?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to request cached file")?
            .error_for_status()
            .context("cached file fetch returned an error status")?;

        info!(
            file = %file.name,
            size = %format!("{}B", SizeFormatterBinary::new(file.size)),
            "downloading cached file to scratch"
        );
        let mut sink = fs::File::create(&path)
            .await
            .with_context(|| format!("failed to create scratch file {}", path.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("failed while streaming cached file")?;
            sink.write_all(&chunk)
                .await
                .context("failed to write scratch file")?;
        }
        sink.flush().await.context("failed to flush scratch file")?;

        info!(file = %file.name, path = %path.display(), "cached file downloaded");
        Ok(path)
    }

    async fn upload_file(&self, file: &SeedrFile, path: &Path) -> Result<()> {
        let key = content_key(&file.name);
        info!(
            file = %file.name,
            size = %format!("{}B", SizeFormatterBinary::new(file.size)),
            drive = %key,
            "uploading to object store"
        );
        self.drive.put_file(&key, &file.name, path).await?;
        self.drive
            .insert_record(
                FILES_TABLE,
                &FileRecord {
                    name: file.name.clone(),
                    size: file.size,
                    hash: key.clone(),
                    created_at: Utc::now(),
                    downloads_count: 0,
                },
            )
            .await?;
        info!(file = %file.name, drive = %key, "uploaded to object store");

        let dir = self.scratch_dir(file);
        fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("failed to remove scratch dir {}", dir.display()))?;
        Ok(())
    }

    fn scratch_dir(&self, file: &SeedrFile) -> PathBuf {
        self.settings.download_path.join(file.id.to_string())
    }
}

// Resumable by existence: a scratch file of exactly the expected size is a
// finished earlier attempt.
async fn already_present(path: &Path, size: u64) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() == size,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httpmock::prelude::*;
    use rssbox_config::LogLevel;
    use rssbox_seedr::TokenSink;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use url::Url;

    struct NoopSink;

    #[async_trait::async_trait]
    impl TokenSink for NoopSink {
        async fn token_refreshed(&self, _account_id: &str, _token: &str) {}
    }

    fn settings_with_root(root: &Path) -> Settings {
        Settings {
            rss_url: "https://feed.example/releases.xml".to_string(),
            database_url: "postgres://localhost/rssbox".to_string(),
            deta_key: "proj_secret".to_string(),
            filter_extensions: BTreeSet::from(["mkv".to_string(), "mp4".to_string()]),
            download_path: root.to_path_buf(),
            log_file: PathBuf::from("rssbox.log"),
            log_level: LogLevel::Info,
        }
    }

    fn handler_for(server: &MockServer, root: &Path) -> Result<(FileHandler, SeedrClient)> {
        let base: Url = server.base_url().parse()?;
        let drive = DriveClient::with_hosts(
            Client::new(),
            "proj_secret",
            base.clone(),
            base.clone(),
        )?;
        let handler = FileHandler::new(Client::new(), drive, settings_with_root(root));
        let seedr = SeedrClient::new(Client::new(), base, "acct", "tok", Arc::new(NoopSink))?;
        Ok((handler, seedr))
    }

    #[tokio::test]
    async fn scratch_files_resume_by_existence() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let path = scratch.path().join("Movie.mkv");
        tokio::fs::write(&path, b"0123456789").await?;

        assert!(already_present(&path, 10).await);
        assert!(!already_present(&path, 11).await, "size mismatch re-fetches");
        assert!(!already_present(&scratch.path().join("gone.mkv"), 10).await);
        Ok(())
    }

    #[tokio::test]
    async fn filtered_extensions_never_touch_the_network() -> Result<()> {
        let server = MockServer::start_async().await;
        let scratch = tempfile::tempdir()?;
        let (handler, seedr) = handler_for(&server, scratch.path())?;

        let item = SeedrItem::File(SeedrFile {
            id: 7,
            name: "notes.txt".to_string(),
            size: 10,
            folder_id: 0,
        });
        let uploaded = handler.upload(&seedr, &item).await?;
        assert_eq!(uploaded, 0);
        Ok(())
    }

    #[tokio::test]
    async fn single_file_is_downloaded_uploaded_and_cleaned_up() -> Result<()> {
        let server = MockServer::start_async().await;
        let scratch = tempfile::tempdir()?;
        let (handler, seedr) = handler_for(&server, scratch.path())?;

        let fetch = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth_test/resource.php")
                .query_param("func", "fetch_file");
            then.status(200)
                .json_body(json!({"url": server.url("/payload/Movie.mkv")}));
        });
        let payload = server.mock(|when, then| {
            when.method(GET).path("/payload/Movie.mkv");
            then.status(200).body("0123456789");
        });
        let put = server.mock(|when, then| {
            when.method(POST)
                .path(format!("/proj/{}/files", content_key("Movie.mkv")))
                .query_param("name", "Movie.mkv")
                .body("0123456789");
            then.status(201);
        });
        let record = server.mock(|when, then| {
            when.method(POST).path("/proj/files/items");
            then.status(201);
        });

        let item = SeedrItem::File(SeedrFile {
            id: 7,
            name: "Movie.mkv".to_string(),
            size: 10,
            folder_id: 0,
        });
        let uploaded = handler.upload(&seedr, &item).await?;

        fetch.assert();
        payload.assert();
        put.assert();
        record.assert();
        assert_eq!(uploaded, 1);
        assert!(
            !scratch.path().join("7").exists(),
            "scratch dir is removed after upload"
        );
        Ok(())
    }

    #[tokio::test]
    async fn folders_are_walked_depth_first_with_filtering() -> Result<()> {
        let server = MockServer::start_async().await;
        let scratch = tempfile::tempdir()?;
        let (handler, seedr) = handler_for(&server, scratch.path())?;

        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth_test/resource.php")
                .query_param("func", "list_contents")
                .body_includes("content_id=11");
            then.status(200).json_body(json!({
                "folders": [{"id": 12, "name": "Extras"}],
                "files": [
                    {"folder_file_id": 1, "name": "A.mkv", "size": 4, "folder_id": 11},
                    {"folder_file_id": 2, "name": "sample.txt", "size": 4, "folder_id": 11}
                ],
                "torrents": []
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth_test/resource.php")
                .query_param("func", "list_contents")
                .body_includes("content_id=12");
            then.status(200).json_body(json!({
                "folders": [],
                "files": [{"folder_file_id": 3, "name": "B.mp4", "size": 4, "folder_id": 12}],
                "torrents": []
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth_test/resource.php")
                .query_param("func", "fetch_file")
                .body_includes("folder_file_id=1");
            then.status(200).json_body(json!({"url": server.url("/payload/A.mkv")}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/oauth_test/resource.php")
                .query_param("func", "fetch_file")
                .body_includes("folder_file_id=3");
            then.status(200).json_body(json!({"url": server.url("/payload/B.mp4")}));
        });
        server.mock(|when, then| {
            when.method(GET).path_includes("/payload/");
            then.status(200).body("data");
        });
        server.mock(|when, then| {
            when.method(POST).path_includes("/files").query_param_exists("name");
            then.status(201);
        });
        let records = server.mock(|when, then| {
            when.method(POST).path("/proj/files/items");
            then.status(201);
        });

        let item = SeedrItem::Folder(SeedrFolder {
            id: 11,
            name: "Movie.2024".to_string(),
        });
        let uploaded = handler.upload(&seedr, &item).await?;

        assert_eq!(uploaded, 2, "one filtered file, two delivered");
        assert_eq!(records.calls(), 2);
        Ok(())
    }
}
