use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::codec::ControlMessage;
use crate::endpoint::SwappableEndpoint;
use crate::errors::ShimError;

/// Out-of-band cut-over listener.
///
/// A small local UDP socket through which an orchestrator outside the client
/// process can order the cut-over the moment the restored server is serving,
/// instead of waiting for a business I/O deadline to fire. Each accepted
/// datagram triggers one `commit()`; nothing is ever sent back.
///
/// Accepted payloads: the ASCII literal `commit` (surrounding whitespace
/// tolerated, case-insensitive) or the control protocol's single-line
/// `{"type":"commit",...}` encoding. Anything else is ignored.
pub struct CommitListener {
    socket: UdpSocket,
}

impl CommitListener {
    pub async fn bind(listen_addr: SocketAddr) -> Result<Self, ShimError> {
        let socket = UdpSocket::bind(listen_addr).await?;
        debug!(addr = %socket.local_addr()?, "commit listener bound");
        Ok(Self { socket })
    }

    /// The bound address; useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves commit datagrams until `shutdown` is cancelled.
    pub async fn run(
        self,
        endpoint: Arc<SwappableEndpoint>,
        shutdown: CancellationToken,
    ) -> Result<(), ShimError> {
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                res = self.socket.recv_from(&mut buf) => res?,
            };
            let payload = String::from_utf8_lossy(&buf[..n]);
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }
            if !is_commit(payload) {
                trace!(%from, "ignoring non-commit datagram on commit channel");
                continue;
            }
            if endpoint.commit() {
                info!(%from, peer = ?endpoint.real_peer(), "out-of-band commit; cut over");
            } else {
                debug!(%from, "out-of-band commit with nothing to promote");
            }
        }
    }
}

fn is_commit(payload: &str) -> bool {
    if payload.eq_ignore_ascii_case("commit") {
        return true;
    }
    matches!(
        ControlMessage::decode(payload),
        Ok(Some(ControlMessage::Commit { .. }))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_literal_and_encoded_commit() {
        assert!(is_commit("commit"));
        assert!(is_commit("COMMIT"));
        assert!(is_commit(r#"{"type":"commit","id":"c-1"}"#));
    }

    #[test]
    fn rejects_other_payloads() {
        assert!(!is_commit("migrate"));
        assert!(!is_commit(r#"{"type":"migrate","id":"m-1"}"#));
        assert!(!is_commit("{not json"));
    }
}
