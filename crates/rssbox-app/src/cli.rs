use clap::Parser;

/// Command-line flags for the worker process. Everything else comes from
/// the environment.
#[derive(Debug, Parser)]
#[command(name = "rssbox", about = "RSS to object-store ingestion worker")]
pub(crate) struct Cli {
    /// Force debug logging regardless of `LOG_LEVEL`.
    #[arg(long)]
    pub(crate) debug: bool,

    /// Alias of `--debug`.
    #[arg(long)]
    pub(crate) verbose: bool,
}

impl Cli {
    pub(crate) const fn wants_debug(&self) -> bool {
        self.debug || self.verbose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn either_flag_elevates_to_debug() {
        assert!(!Cli::parse_from(["rssbox"]).wants_debug());
        assert!(Cli::parse_from(["rssbox", "--debug"]).wants_debug());
        assert!(Cli::parse_from(["rssbox", "--verbose"]).wants_debug());
    }
}
