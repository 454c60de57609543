//! Transport failure classification for the upload path.

use std::io;

/// How a failed delivery attempt is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Charged to the download: one retry consumed.
    Hard,
    /// Charged to the transport: a truncated TLS stream is not the
    /// download's fault, so its retry budget is untouched.
    Soft,
}

/// Classify an upload error by walking its source chain.
///
/// A TLS stream cut short (an unexpected EOF anywhere in the chain) is a
/// soft failure; connection-level failures are hard. Anything else is not a
/// transport failure at all and must propagate, leaving the lease for the
/// reaper.
pub(crate) fn transport_failure(err: &anyhow::Error) -> Option<FailureKind> {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::UnexpectedEof => return Some(FailureKind::Soft),
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => return Some(FailureKind::Hard),
                _ => {}
            }
        }
        if let Some(request_err) = cause.downcast_ref::<reqwest::Error>() {
            if request_err.is_connect() {
                return Some(FailureKind::Hard);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn unexpected_eof_is_soft_wherever_it_sits() {
        let err = anyhow::Error::new(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "tls close without close_notify",
        ))
        .context("failed while streaming cached file");
        assert_eq!(transport_failure(&err), Some(FailureKind::Soft));
    }

    #[test]
    fn connection_failures_are_hard() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            let err = anyhow::Error::new(io::Error::new(kind, "connection failure"))
                .context("upload failed");
            assert_eq!(transport_failure(&err), Some(FailureKind::Hard), "{kind:?}");
        }
    }

    #[test]
    fn non_transport_errors_are_unclassified() {
        let err = anyhow!("cache listing was malformed");
        assert_eq!(transport_failure(&err), None);

        let io_err = anyhow::Error::new(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(transport_failure(&io_err), None);
    }

    #[tokio::test]
    async fn reqwest_connect_errors_classify_as_hard() {
        // Nothing listens on the discard port.
        let result = reqwest::Client::new()
            .get("http://127.0.0.1:9/unreachable")
            .timeout(std::time::Duration::from_secs(2))
            .send()
            .await;
        let Err(source) = result else {
            // Environment actually runs a discard service; nothing to assert.
            return;
        };
        let err = anyhow::Error::new(source).context("upload failed");
        assert_eq!(transport_failure(&err), Some(FailureKind::Hard));
    }
}
