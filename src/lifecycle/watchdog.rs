use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::endpoint::SwappableEndpoint;

/// Fallback cut-over path for deployments without an out-of-band commit
/// notifier.
///
/// The application reports business-stream I/O failures here; once the
/// control plane has announced a migration (the migrate-seen latch fired),
/// the first failure is taken as evidence that the old address went dark and
/// the armed peer is promoted. Failures before any announcement are ordinary
/// network trouble and are left to the QUIC stack.
pub struct CutoverWatchdog {
    endpoint: Arc<SwappableEndpoint>,
    migrate_seen: CancellationToken,
}

impl CutoverWatchdog {
    pub fn new(endpoint: Arc<SwappableEndpoint>, migrate_seen: CancellationToken) -> Self {
        Self {
            endpoint,
            migrate_seen,
        }
    }

    /// Reports an I/O failure on a business stream. Returns `true` iff this
    /// call performed the cut-over.
    pub fn report_io_failure(&self) -> bool {
        if !self.migrate_seen.is_cancelled() {
            return false;
        }
        let switched = self.endpoint.commit();
        if switched {
            info!(peer = ?self.endpoint.real_peer(), "io failure after migrate; cut over");
        }
        switched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn does_nothing_before_migrate_seen() {
        let target: SocketAddr = "127.0.0.1:5243".parse().unwrap();
        let endpoint = Arc::new(SwappableEndpoint::connect(target).await.unwrap());
        endpoint.arm("127.0.0.1:6000".parse().unwrap());
        let watchdog = CutoverWatchdog::new(Arc::clone(&endpoint), CancellationToken::new());

        assert!(!watchdog.report_io_failure());
        assert_eq!(endpoint.real_peer(), Some(target));
    }

    #[tokio::test]
    async fn commits_after_migrate_seen() {
        let target: SocketAddr = "127.0.0.1:5243".parse().unwrap();
        let armed: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        let endpoint = Arc::new(SwappableEndpoint::connect(target).await.unwrap());
        endpoint.arm(armed);

        let seen = CancellationToken::new();
        seen.cancel();
        let watchdog = CutoverWatchdog::new(Arc::clone(&endpoint), seen);

        assert!(watchdog.report_io_failure());
        assert_eq!(endpoint.real_peer(), Some(armed));
        // A second failure after the promotion has nothing left to do.
        assert!(!watchdog.report_io_failure());
    }
}
