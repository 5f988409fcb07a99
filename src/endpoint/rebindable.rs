use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use crate::endpoint::slot::SocketSlot;
use crate::endpoint::{with_deadline, DatagramEndpoint, Deadlines};
use crate::errors::ShimError;

/// Server-side datagram endpoint that survives its kernel socket being
/// destroyed and re-created.
///
/// A restore into a new network namespace invalidates the bound socket; the
/// orchestrator then triggers [`rebind`](RebindableEndpoint::rebind), which
/// installs a fresh socket bound to the same intended local address.
/// Concurrent `recv`/`send` calls observe the swap as one internal retry and
/// nothing else, so the QUIC stack on top keeps running through the move.
pub struct RebindableEndpoint {
    slot: SocketSlot,
    deadlines: Deadlines,
}

impl RebindableEndpoint {
    /// Binds the endpoint to its intended local address.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ShimError> {
        let slot = SocketSlot::bind(addr).await?;
        Ok(Self {
            slot,
            deadlines: Deadlines::default(),
        })
    }

    /// Replaces the underlying socket with a fresh one bound to the same
    /// intended address and bumps the generation.
    ///
    /// On [`ShimError::Bind`] the previous socket remains installed and the
    /// generation is unchanged; the endpoint keeps working. Safe to call
    /// repeatedly; every successful call produces a new kernel socket.
    pub async fn rebind(&self) -> Result<(), ShimError> {
        self.slot.rebind_to(None).await?;
        info!(
            generation = self.slot.generation(),
            addr = ?self.slot.local_addr().ok(),
            "server endpoint rebound"
        );
        Ok(())
    }

    /// Current generation; strictly increases with every rebind and close.
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        with_deadline(self.deadlines.read(), self.slot.recv_from(buf)).await
    }

    pub async fn send(&self, buf: &[u8], dest: SocketAddr) -> Result<usize, ShimError> {
        with_deadline(self.deadlines.write(), self.slot.send_to(buf, dest)).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        self.slot.local_addr()
    }

    pub fn close(&self) -> Result<(), ShimError> {
        self.slot.close()
    }
}

#[async_trait]
impl DatagramEndpoint for RebindableEndpoint {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        RebindableEndpoint::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8], dest: SocketAddr) -> Result<usize, ShimError> {
        RebindableEndpoint::send(self, buf, dest).await
    }

    fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        RebindableEndpoint::local_addr(self)
    }

    fn close(&self) -> Result<(), ShimError> {
        RebindableEndpoint::close(self)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_read(deadline);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.set_write(deadline);
    }
}
