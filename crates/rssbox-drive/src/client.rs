use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::{Body, Client};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::error::{DriveError, Result};

const DEFAULT_DRIVE_HOST: &str = "https://drive.deta.sh/v1";
const DEFAULT_BASE_HOST: &str = "https://database.deta.sh/v1";

/// Metadata table receiving one row per delivered file.
pub const FILES_TABLE: &str = "files";

/// Content key for a file name: the hex MD5 digest, which doubles as the
/// drive name holding the file.
#[must_use]
pub fn content_key(file_name: &str) -> String {
    format!("{:x}", md5::compute(file_name.as_bytes()))
}

/// Metadata row describing one delivered file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    /// File name as shown to consumers.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Content key of the drive holding the payload.
    pub hash: String,
    /// Delivery time.
    pub created_at: DateTime<Utc>,
    /// Download counter, starts at zero.
    pub downloads_count: u32,
}

#[derive(Serialize)]
struct InsertItems<'a> {
    items: [&'a FileRecord; 1],
}

/// Client for the object store and its metadata table.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    project_id: String,
    api_key: String,
    drive_host: Url,
    base_host: Url,
}

impl DriveClient {
    /// Build a client from the `{project_id}_{secret}` credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential has no project prefix.
    pub fn new(http: Client, deta_key: &str) -> Result<Self> {
        let drive_host = Url::parse(DEFAULT_DRIVE_HOST).map_err(|source| DriveError::Endpoint {
            operation: "new",
            source,
        })?;
        let base_host = Url::parse(DEFAULT_BASE_HOST).map_err(|source| DriveError::Endpoint {
            operation: "new",
            source,
        })?;
        Self::with_hosts(http, deta_key, drive_host, base_host)
    }

    /// Build a client against explicit hosts. Production uses [`Self::new`];
    /// tests point this at a local server.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential has no project prefix.
    pub fn with_hosts(
        http: Client,
        deta_key: &str,
        drive_host: Url,
        base_host: Url,
    ) -> Result<Self> {
        let (project_id, _) = deta_key.split_once('_').ok_or(DriveError::InvalidKey)?;
        if project_id.is_empty() {
            return Err(DriveError::InvalidKey);
        }
        Ok(Self {
            http,
            project_id: project_id.to_string(),
            api_key: deta_key.to_string(),
            drive_host,
            base_host,
        })
    }

    /// Stream a local file into `drive` under `name`, overwriting any
    /// previous content of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the upload fails.
    pub async fn put_file(&self, drive: &str, name: &str, path: &Path) -> Result<()> {
        let url = self.endpoint(&self.drive_host, &format!("{drive}/files"), "put_file")?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| DriveError::Io {
                operation: "put_file",
                path: path.to_path_buf(),
                source,
            })?;

        debug!(drive = %drive, name = %name, "uploading file to object store");
        let response = self
            .http
            .post(url)
            .query(&[("name", name)])
            .header("x-api-key", &self.api_key)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|source| DriveError::Http {
                operation: "put_file",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriveError::Status {
                operation: "put_file",
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Insert one metadata row into `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_record(&self, table: &str, record: &FileRecord) -> Result<()> {
        let url = self.endpoint(&self.base_host, &format!("{table}/items"), "insert_record")?;
        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(&InsertItems { items: [record] })
            .send()
            .await
            .map_err(|source| DriveError::Http {
                operation: "insert_record",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriveError::Status {
                operation: "insert_record",
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn endpoint(&self, host: &Url, suffix: &str, operation: &'static str) -> Result<Url> {
        Url::parse(&format!(
            "{}/{}/{}",
            host.as_str().trim_end_matches('/'),
            self.project_id,
            suffix
        ))
        .map_err(|source| DriveError::Endpoint { operation, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::io::Write;

    fn client_for(server: &MockServer) -> Result<DriveClient> {
        let host: Url = server.base_url().parse()?;
        Ok(DriveClient::with_hosts(
            Client::new(),
            "proj_secret",
            host.clone(),
            host,
        )?)
    }

    #[test]
    fn content_key_is_the_md5_hex_digest() {
        assert_eq!(content_key("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(content_key("abc").len(), 32);
        assert_ne!(content_key("Movie.mkv"), content_key("movie.mkv"));
    }

    #[test]
    fn credential_must_carry_a_project_prefix() {
        assert!(matches!(
            DriveClient::new(Client::new(), "nokey"),
            Err(DriveError::InvalidKey)
        ));
        assert!(matches!(
            DriveClient::new(Client::new(), "_secret"),
            Err(DriveError::InvalidKey)
        ));
        assert!(DriveClient::new(Client::new(), "proj_secret").is_ok());
    }

    #[tokio::test]
    async fn put_file_streams_the_local_payload() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/proj/0015a/files")
                .query_param("name", "Movie.mkv")
                .header("x-api-key", "proj_secret")
                .body("file-bytes");
            then.status(201).json_body(json!({"name": "Movie.mkv"}));
        });

        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(b"file-bytes")?;

        let client = client_for(&server)?;
        client.put_file("0015a", "Movie.mkv", scratch.path()).await?;

        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn insert_record_posts_one_item() -> Result<()> {
        let server = MockServer::start_async().await;
        let created_at = "2024-05-01T12:00:00Z".parse::<DateTime<Utc>>()?;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/proj/files/items")
                .header("x-api-key", "proj_secret")
                .body_includes("\"items\":[{\"name\":\"Movie.mkv\"")
                .body_includes("\"hash\":\"0015a\"")
                .body_includes("\"downloads_count\":0");
            then.status(201);
        });

        let client = client_for(&server)?;
        client
            .insert_record(
                FILES_TABLE,
                &FileRecord {
                    name: "Movie.mkv".to_string(),
                    size: 1024,
                    hash: "0015a".to_string(),
                    created_at,
                    downloads_count: 0,
                },
            )
            .await?;

        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn error_statuses_surface_as_status_errors() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/proj/full/files");
            then.status(507);
        });

        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(b"payload")?;

        let client = client_for(&server)?;
        let result = client.put_file("full", "Movie.mkv", scratch.path()).await;
        assert!(matches!(
            result,
            Err(DriveError::Status { operation: "put_file", status: 507 })
        ));
        Ok(())
    }
}
