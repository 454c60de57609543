use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Extensions admitted by default when `FILTER_EXTENSIONS` is not set:
/// the common video containers, lowercase, without a leading dot.
pub const DEFAULT_FILTER_EXTENSIONS: &str =
    "mkv,mp4,avi,mpg,mpeg,webm,flv,wmv,mov,m4v,3gp,ogv";

const DEFAULT_DOWNLOAD_PATH: &str = "downloads";
const DEFAULT_LOG_FILE: &str = "rssbox.log";

/// Logging verbosity resolved from the environment and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Operational logging only.
    Info,
    /// Full diagnostic logging.
    Debug,
}

impl LogLevel {
    /// Directive string understood by the tracing env filter.
    #[must_use]
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Fully resolved process settings.
///
/// `RSS_URL`, `DATABASE_URL` and `DETA_KEY` are required; everything else is
/// defaulted. The scratch directory is resolved to an absolute path so the
/// file handler never depends on the working directory at upload time.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Feed endpoint polled by the watcher.
    pub rss_url: String,
    /// Postgres connection string for the shared coordination store.
    pub database_url: String,
    /// Object-store credential, `{project_id}_{secret}`.
    pub deta_key: String,
    /// Lowercased extension allow-list, no leading dots, deduplicated.
    pub filter_extensions: BTreeSet<String>,
    /// Absolute scratch directory for in-flight file downloads.
    pub download_path: PathBuf,
    /// Log file, truncated at startup.
    pub log_file: PathBuf,
    /// Resolved verbosity.
    pub log_level: LogLevel,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// `force_debug` reflects the `--debug`/`--verbose` CLI flags and wins
    /// over `LOG_LEVEL`.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or the download
    /// path cannot be made absolute.
    pub fn from_env(force_debug: bool) -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok(), force_debug)
    }

    fn from_lookup<F>(lookup: F, force_debug: bool) -> Result<Self>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let rss_url = required(&lookup, "RSS_URL")?;
        let database_url = required(&lookup, "DATABASE_URL")?;
        let deta_key = required(&lookup, "DETA_KEY")?;

        let filter_extensions = parse_extensions(
            lookup("FILTER_EXTENSIONS")
                .as_deref()
                .unwrap_or(DEFAULT_FILTER_EXTENSIONS),
        );

        let download_path = absolute(PathBuf::from(
            lookup("DOWNLOAD_PATH").unwrap_or_else(|| DEFAULT_DOWNLOAD_PATH.to_string()),
        ))?;
        let log_file = PathBuf::from(
            lookup("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
        );

        let debug = force_debug || lookup("LOG_LEVEL").as_deref() == Some("DEBUG");
        let log_level = if debug { LogLevel::Debug } else { LogLevel::Info };

        Ok(Self {
            rss_url,
            database_url,
            deta_key,
            filter_extensions,
            download_path,
            log_file,
            log_level,
        })
    }

    /// Whether a file name passes the extension allow-list.
    ///
    /// The comparison is case-insensitive and looks only at the final
    /// dot-separated segment; names without an extension never match.
    #[must_use]
    pub fn extension_allowed(&self, file_name: &str) -> bool {
        file_name
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| {
                !stem.is_empty() && self.filter_extensions.contains(&ext.to_ascii_lowercase())
            })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String>
where
    F: Fn(&'static str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}

fn parse_extensions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = env::current_dir().map_err(|source| ConfigError::Io {
        operation: "current_dir",
        source,
    })?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env(name: &'static str) -> Option<String> {
        match name {
            "RSS_URL" => Some("https://feed.example/releases.xml".to_string()),
            "DATABASE_URL" => Some("postgres://localhost/rssbox".to_string()),
            "DETA_KEY" => Some("proj_secret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() -> Result<()> {
        let settings = Settings::from_lookup(base_env, false)?;
        assert!(settings.download_path.is_absolute());
        assert!(settings.download_path.ends_with("downloads"));
        assert_eq!(settings.log_file, PathBuf::from("rssbox.log"));
        assert_eq!(settings.log_level, LogLevel::Info);
        assert!(settings.filter_extensions.contains("mkv"));
        assert!(settings.filter_extensions.contains("ogv"));
        Ok(())
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let result = Settings::from_lookup(|name| base_env(name).filter(|_| name != "RSS_URL"), false);
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnv { name: "RSS_URL" })
        ));
    }

    #[test]
    fn extension_list_is_normalised() {
        let set = parse_extensions(" MKV, .mp4 ,mkv,, webm ");
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["mkv".to_string(), "mp4".to_string(), "webm".to_string()]
        );
    }

    #[test]
    fn extension_filter_matches_suffix_only() -> Result<()> {
        let settings = Settings::from_lookup(base_env, false)?;
        assert!(settings.extension_allowed("Movie.2024.MKV"));
        assert!(settings.extension_allowed("clip.webm"));
        assert!(!settings.extension_allowed("notes.txt"));
        assert!(!settings.extension_allowed("mkv"));
        assert!(!settings.extension_allowed(".mkv"));
        Ok(())
    }

    #[test]
    fn debug_flag_beats_log_level() -> Result<()> {
        let settings = Settings::from_lookup(base_env, true)?;
        assert_eq!(settings.log_level, LogLevel::Debug);

        let with_env = Settings::from_lookup(
            |name| {
                if name == "LOG_LEVEL" {
                    Some("DEBUG".to_string())
                } else {
                    base_env(name)
                }
            },
            false,
        )?;
        assert_eq!(with_env.log_level, LogLevel::Debug);
        Ok(())
    }
}
