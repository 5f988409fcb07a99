use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::endpoint::slot::SocketSlot;
use crate::endpoint::{same_host_port, with_deadline, DatagramEndpoint, Deadlines};
use crate::errors::ShimError;

struct PeerSlots {
    /// The address datagrams are actually sent to and accepted from.
    real: Option<SocketAddr>,
    /// Candidate peer staged by `arm`, promoted by `commit`.
    armed: Option<SocketAddr>,
}

/// Client-side datagram endpoint that forwards traffic to a mutable *real
/// peer* while reporting a fixed *logical peer* upward.
///
/// The QUIC stack dials the logical peer once and never sees it change, so a
/// server move triggers neither path validation nor session teardown.
/// Underneath, the control plane either stages the new address with
/// [`arm`](SwappableEndpoint::arm) and promotes it later with
/// [`commit`](SwappableEndpoint::commit), or replaces it in one step with
/// [`set`](SwappableEndpoint::set). Inbound datagrams from anything other
/// than the current real peer are dropped so stray traffic cannot reach the
/// QUIC stack.
pub struct SwappableEndpoint {
    slot: SocketSlot,
    peers: RwLock<PeerSlots>,
    logical_peer: SocketAddr,
    deadlines: Deadlines,
}

impl SwappableEndpoint {
    /// Creates the endpoint for an initial dial to `target`: binds an
    /// ephemeral local socket of the matching address family, with real peer
    /// and logical peer both set to `target`.
    pub async fn connect(target: SocketAddr) -> Result<Self, ShimError> {
        let local_ip = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::connect_from(SocketAddr::new(local_ip, 0), target).await
    }

    /// Like [`connect`](SwappableEndpoint::connect) with an explicit local
    /// bind address.
    pub async fn connect_from(local: SocketAddr, target: SocketAddr) -> Result<Self, ShimError> {
        let slot = SocketSlot::bind(local).await?;
        Ok(Self {
            slot,
            peers: RwLock::new(PeerSlots {
                real: Some(target),
                armed: None,
            }),
            logical_peer: target,
            deadlines: Deadlines::default(),
        })
    }

    /// Stages `peer` as the cut-over candidate without touching the real
    /// peer. Idempotent; a later `arm` replaces the staged candidate.
    pub fn arm(&self, peer: SocketAddr) {
        let mut peers = self.peers.write().unwrap();
        peers.armed = Some(peer);
        debug!(armed = %peer, "armed candidate peer");
    }

    /// Promotes the armed peer to real peer.
    ///
    /// Returns `true` iff a cut-over happened: an armed peer was present and
    /// differed from the current real peer. The armed slot is cleared on
    /// promotion, so a repeated `commit` returns `false`.
    pub fn commit(&self) -> bool {
        let mut peers = self.peers.write().unwrap();
        let Some(armed) = peers.armed else {
            return false;
        };
        if let Some(real) = peers.real {
            if same_host_port(real, armed) {
                return false;
            }
        }
        peers.real = Some(armed);
        peers.armed = None;
        debug!(peer = %armed, "cut over to armed peer");
        true
    }

    /// Replaces the real peer immediately, bypassing arm/commit. The armed
    /// slot is left as-is.
    pub fn set(&self, peer: SocketAddr) {
        let mut peers = self.peers.write().unwrap();
        peers.real = Some(peer);
        debug!(peer = %peer, "real peer replaced");
    }

    /// Rebinds the outbound socket, optionally to a new local address; used
    /// when the client itself changes network interface. Same bind-new,
    /// install, release-old discipline as the server-side rebind.
    pub async fn rebind_local(&self, local: Option<SocketAddr>) -> Result<(), ShimError> {
        self.slot.rebind_to(local).await
    }

    pub fn real_peer(&self) -> Option<SocketAddr> {
        self.peers.read().unwrap().real
    }

    pub fn armed_peer(&self) -> Option<SocketAddr> {
        self.peers.read().unwrap().armed
    }

    /// The fixed peer address reported upward; never changes for the
    /// lifetime of the endpoint.
    pub fn logical_peer(&self) -> SocketAddr {
        self.logical_peer
    }

    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        with_deadline(self.deadlines.read(), self.recv_filtered(buf)).await
    }

    /// Sends to the current real peer, ignoring any caller-supplied
    /// destination (the QUIC stack only ever passes the logical peer).
    pub async fn send(&self, buf: &[u8]) -> Result<usize, ShimError> {
        with_deadline(self.deadlines.write(), self.send_to_real(buf)).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        self.slot.local_addr()
    }

    pub fn close(&self) -> Result<(), ShimError> {
        self.slot.close()
    }

    async fn recv_filtered(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        loop {
            let (n, from) = self.slot.recv_from(buf).await?;
            if let Some(real) = self.real_peer() {
                if !same_host_port(real, from) {
                    // Stray datagram; only the current real peer may reach
                    // the QUIC stack.
                    trace!(%from, expected = %real, "dropping datagram from unexpected source");
                    continue;
                }
            }
            return Ok((n, self.logical_peer));
        }
    }

    async fn send_to_real(&self, buf: &[u8]) -> Result<usize, ShimError> {
        let real = self.real_peer().ok_or(ShimError::NoPeer)?;
        self.slot.send_to(buf, real).await
    }
}

#[async_trait]
impl DatagramEndpoint for SwappableEndpoint {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        SwappableEndpoint::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8], _dest: SocketAddr) -> Result<usize, ShimError> {
        SwappableEndpoint::send(self, buf).await
    }

    fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        SwappableEndpoint::local_addr(self)
    }

    fn close(&self) -> Result<(), ShimError> {
        SwappableEndpoint::close(self)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_read(deadline);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_write(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    async fn endpoint() -> SwappableEndpoint {
        SwappableEndpoint::connect(addr("127.0.0.1:5243")).await.unwrap()
    }

    #[tokio::test]
    async fn commit_without_armed_peer_is_a_no_op() {
        let ep = endpoint().await;
        assert!(!ep.commit());
        assert_eq!(ep.real_peer(), Some(addr("127.0.0.1:5243")));
    }

    #[tokio::test]
    async fn arm_then_commit_promotes_once() {
        let ep = endpoint().await;
        ep.arm(addr("127.0.0.1:6000"));
        assert!(ep.commit());
        assert_eq!(ep.real_peer(), Some(addr("127.0.0.1:6000")));
        assert_eq!(ep.armed_peer(), None);
        // Promotion consumed the armed slot.
        assert!(!ep.commit());
    }

    #[tokio::test]
    async fn committing_the_current_peer_reports_no_cutover() {
        let ep = endpoint().await;
        ep.arm(addr("127.0.0.1:5243"));
        assert!(!ep.commit());
        assert_eq!(ep.real_peer(), Some(addr("127.0.0.1:5243")));
    }

    #[tokio::test]
    async fn commit_normalizes_mapped_addresses() {
        let ep = endpoint().await;
        ep.arm(addr("[::ffff:127.0.0.1]:5243"));
        // Same host and port as the real peer, only spelled differently.
        assert!(!ep.commit());
    }

    #[tokio::test]
    async fn rearming_replaces_the_candidate() {
        let ep = endpoint().await;
        ep.arm(addr("127.0.0.1:6000"));
        ep.arm(addr("127.0.0.1:7000"));
        assert!(ep.commit());
        assert_eq!(ep.real_peer(), Some(addr("127.0.0.1:7000")));
    }

    #[tokio::test]
    async fn set_bypasses_the_armed_slot() {
        let ep = endpoint().await;
        ep.arm(addr("127.0.0.1:6000"));
        ep.set(addr("127.0.0.1:8000"));
        assert_eq!(ep.real_peer(), Some(addr("127.0.0.1:8000")));
        assert_eq!(ep.armed_peer(), Some(addr("127.0.0.1:6000")));
    }

    #[tokio::test]
    async fn logical_peer_is_fixed() {
        let ep = endpoint().await;
        ep.set(addr("127.0.0.1:9000"));
        assert_eq!(ep.logical_peer(), addr("127.0.0.1:5243"));
    }
}
