//! Typed view of the cache's duck-typed workspace listing.
//!
//! The cache returns a free-form JSON object; the coordinator only ever
//! treats it as three lists of records with known keys. Numeric fields
//! arrive as numbers or strings depending on the endpoint, so every field
//! is read leniently.

use serde_json::Value;

use crate::error::{Result, SeedrError};

/// One file in the account workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedrFile {
    /// File identifier used by `fetch_file` and `delete_file`.
    pub id: i64,
    /// File name, matched exactly against the download's canonical name.
    pub name: String,
    /// Size in bytes as reported by the cache.
    pub size: u64,
    /// Identifier of the folder containing this file.
    pub folder_id: i64,
}

/// One folder in the account workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedrFolder {
    /// Folder identifier used by `list_contents` and `delete_folder`.
    pub id: i64,
    /// Folder name, matched exactly against the download's canonical name.
    pub name: String,
}

/// One torrent still being assembled by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedrTorrent {
    /// Torrent identifier used by `delete_torrent`.
    pub id: i64,
    /// Torrent name.
    pub name: String,
    /// Completion percentage.
    pub progress: f64,
    /// Size in bytes.
    pub size: i64,
    /// Whether the cache has stopped working on the torrent.
    pub stopped: bool,
}

/// A matched workspace entry: the finished payload is either a single file
/// or a folder tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedrItem {
    /// A single finished file.
    File(SeedrFile),
    /// A folder holding the finished payload.
    Folder(SeedrFolder),
}

impl SeedrItem {
    /// Name of the matched entry.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Folder(folder) => &folder.name,
        }
    }
}

/// Decoded workspace listing.
#[derive(Debug, Clone, Default)]
pub struct SeedrListing {
    /// Top-level folders.
    pub folders: Vec<SeedrFolder>,
    /// Top-level files.
    pub files: Vec<SeedrFile>,
    /// Torrents still in progress.
    pub torrents: Vec<SeedrTorrent>,
}

impl SeedrListing {
    /// Find the finished payload for `name`, files first, then folders.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<SeedrItem> {
        if let Some(file) = self.files.iter().find(|file| file.name == name) {
            return Some(SeedrItem::File(file.clone()));
        }
        self.folders
            .iter()
            .find(|folder| folder.name == name)
            .map(|folder| SeedrItem::Folder(folder.clone()))
    }

    /// The in-progress torrent named `name`, if the cache is still working
    /// on it.
    #[must_use]
    pub fn torrent_named(&self, name: &str) -> Option<&SeedrTorrent> {
        self.torrents.iter().find(|torrent| torrent.name == name)
    }
}

pub(crate) fn decode(operation: &'static str, payload: &Value) -> Result<SeedrListing> {
    let result = try_decode(operation, payload);
    if result.is_err() {
        tracing::error!(payload = %payload, "unreadable listing from seedr");
    }
    result
}

fn try_decode(operation: &'static str, payload: &Value) -> Result<SeedrListing> {
    let folders = array(operation, payload, "folders")?
        .iter()
        .map(|folder| {
            Ok(SeedrFolder {
                id: int(operation, folder, "id")?,
                name: string(operation, folder, "name")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let files = array(operation, payload, "files")?
        .iter()
        .map(|file| {
            Ok(SeedrFile {
                id: int(operation, file, "folder_file_id")?,
                name: string(operation, file, "name")?,
                size: int(operation, file, "size")?.unsigned_abs(),
                folder_id: int(operation, file, "folder_id")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let torrents = array(operation, payload, "torrents")?
        .iter()
        .map(|torrent| {
            Ok(SeedrTorrent {
                id: int(operation, torrent, "id")?,
                name: string(operation, torrent, "name")?,
                progress: float(operation, torrent, "progress")?,
                size: int(operation, torrent, "size")?,
                stopped: truthy(torrent.get("stopped")),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SeedrListing {
        folders,
        files,
        torrents,
    })
}

fn missing(operation: &'static str, key: &str) -> SeedrError {
    SeedrError::Malformed {
        operation,
        detail: format!("missing or unreadable key `{key}`"),
    }
}

fn array<'a>(operation: &'static str, value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(operation, key))
}

fn string(operation: &'static str, value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(operation, key))
}

fn int(operation: &'static str, value: &Value, key: &str) -> Result<i64> {
    let field = value.get(key).ok_or_else(|| missing(operation, key))?;
    match field {
        Value::Number(number) => number.as_i64().ok_or_else(|| missing(operation, key)),
        Value::String(text) => text.parse().map_err(|_| missing(operation, key)),
        _ => Err(missing(operation, key)),
    }
}

fn float(operation: &'static str, value: &Value, key: &str) -> Result<f64> {
    let field = value.get(key).ok_or_else(|| missing(operation, key))?;
    match field {
        Value::Number(number) => number.as_f64().ok_or_else(|| missing(operation, key)),
        Value::String(text) => text.parse().map_err(|_| missing(operation, key)),
        _ => Err(missing(operation, key)),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "folders": [{"id": 11, "name": "Movie.2024"}],
            "files": [
                {"folder_file_id": 7, "name": "Movie.mkv", "size": 1024, "folder_id": 0}
            ],
            "torrents": [
                {"id": 3, "name": "Movie.2024", "progress": "42.5", "size": 2048, "stopped": 0}
            ]
        })
    }

    #[test]
    fn decodes_lenient_numeric_fields() -> Result<()> {
        let listing = decode("list_contents", &sample())?;
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.files[0].size, 1024);
        assert!((listing.torrents[0].progress - 42.5).abs() < f64::EPSILON);
        assert!(!listing.torrents[0].stopped);
        Ok(())
    }

    #[test]
    fn missing_top_level_key_is_malformed() {
        let payload = json!({"folders": [], "files": []});
        let result = decode("list_contents", &payload);
        assert!(matches!(
            result,
            Err(SeedrError::Malformed { operation: "list_contents", .. })
        ));
    }

    #[test]
    fn find_prefers_files_over_folders() -> Result<()> {
        let payload = json!({
            "folders": [{"id": 1, "name": "Movie.mkv"}],
            "files": [{"folder_file_id": 2, "name": "Movie.mkv", "size": 10, "folder_id": 0}],
            "torrents": []
        });
        let listing = decode("list_contents", &payload)?;
        assert!(matches!(listing.find("Movie.mkv"), Some(SeedrItem::File(_))));
        assert!(listing.find("Other").is_none());
        Ok(())
    }

    #[test]
    fn torrent_lookup_is_exact() -> Result<()> {
        let listing = decode("list_contents", &sample())?;
        assert!(listing.torrent_named("Movie.2024").is_some());
        assert!(listing.torrent_named("movie.2024").is_none());
        Ok(())
    }
}
