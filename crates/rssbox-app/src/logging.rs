//! Tracing subscriber setup: stderr plus a truncated log file.

use std::fs::File;
use std::sync::Arc;

use anyhow::{Context, Result};
use rssbox_config::Settings;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Chatty dependencies are capped at warn regardless of the base level.
const QUIET_CRATES: &[&str] = &["sqlx", "hyper", "reqwest", "h2", "rustls"];

pub(crate) fn init(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_new(filter_directives(settings))
        .context("failed to build log filter")?;

    // The log file starts fresh on every boot.
    let log_file = File::create(&settings.log_file).with_context(|| {
        format!("failed to open log file {}", settings.log_file.display())
    })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(log_file)))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn filter_directives(settings: &Settings) -> String {
    let mut directives = vec![settings.log_level.as_directive().to_string()];
    directives.extend(QUIET_CRATES.iter().map(|name| format!("{name}=warn")));
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rssbox_config::LogLevel;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn settings(level: LogLevel) -> Settings {
        Settings {
            rss_url: String::new(),
            database_url: String::new(),
            deta_key: String::new(),
            filter_extensions: BTreeSet::new(),
            download_path: PathBuf::new(),
            log_file: PathBuf::from("rssbox.log"),
            log_level: level,
        }
    }

    #[test]
    fn directives_start_with_the_base_level_and_cap_noise() {
        let directives = filter_directives(&settings(LogLevel::Debug));
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(directives.contains("hyper=warn"));

        assert!(filter_directives(&settings(LogLevel::Info)).starts_with("info,"));
    }
}
