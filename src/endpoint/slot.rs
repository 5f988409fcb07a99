//! Replaceable kernel socket shared by both endpoint façades.
//!
//! The slot holds the current socket together with a generation counter, both
//! behind one mutex. Callers blocked in the kernel watch the generation
//! channel; when a rebind installs a fresh socket they transparently retry
//! instead of surfacing the swap. The swap discipline is always bind-new,
//! install, then release the old socket, so at no instant is the slot empty
//! while live.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::trace;

use crate::errors::ShimError;

struct SlotState {
    /// `None` once the slot is terminally closed.
    socket: Option<Arc<UdpSocket>>,
    generation: u64,
    /// The intended bind address, re-used by rebinds.
    bind_addr: SocketAddr,
}

pub(crate) struct SocketSlot {
    state: Mutex<SlotState>,
    /// Mirrors the generation so blocked callers can be woken on a swap.
    rebound: watch::Sender<u64>,
}

impl SocketSlot {
    pub(crate) async fn bind(addr: SocketAddr) -> Result<Self, ShimError> {
        let socket = UdpSocket::bind(addr).await?;
        let (rebound, _) = watch::channel(1);
        Ok(Self {
            state: Mutex::new(SlotState {
                socket: Some(Arc::new(socket)),
                generation: 1,
                bind_addr: addr,
            }),
            rebound,
        })
    }

    fn current(&self) -> Result<(Arc<UdpSocket>, u64), ShimError> {
        let state = self.state.lock().unwrap();
        match &state.socket {
            Some(socket) => Ok((Arc::clone(socket), state.generation)),
            None => Err(ShimError::Closed),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr, ShimError> {
        let state = self.state.lock().unwrap();
        match &state.socket {
            Some(socket) => Ok(socket.local_addr()?),
            None => Err(ShimError::Closed),
        }
    }

    /// Binds a fresh socket, installs it and bumps the generation, then
    /// releases the old one. On bind failure the old socket stays installed
    /// and the generation is unchanged.
    pub(crate) async fn rebind_to(&self, addr: Option<SocketAddr>) -> Result<(), ShimError> {
        let target = addr.unwrap_or_else(|| self.state.lock().unwrap().bind_addr);
        // Bind first: closing first would unblock concurrent readers with a
        // genuine error while no replacement is published yet.
        let fresh = UdpSocket::bind(target).await.map_err(ShimError::Bind)?;
        let old = {
            let mut state = self.state.lock().unwrap();
            if state.socket.is_none() {
                // Lost the race with close(); the fresh socket is dropped.
                return Err(ShimError::Closed);
            }
            let old = state.socket.replace(Arc::new(fresh));
            state.bind_addr = target;
            state.generation += 1;
            self.rebound.send_replace(state.generation);
            old
        };
        trace!(generation = self.generation(), "socket slot rebound");
        drop(old);
        Ok(())
    }

    /// Terminal close. The first call releases the socket; later calls
    /// report `Closed` like every other operation on a closed slot.
    pub(crate) fn close(&self) -> Result<(), ShimError> {
        let mut state = self.state.lock().unwrap();
        if state.socket.is_none() {
            return Err(ShimError::Closed);
        }
        state.socket = None;
        state.generation += 1;
        self.rebound.send_replace(state.generation);
        Ok(())
    }

    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError> {
        let mut rebound = self.rebound.subscribe();
        loop {
            let (socket, generation) = self.current()?;
            tokio::select! {
                res = socket.recv_from(buf) => match res {
                    Ok(v) => return Ok(v),
                    Err(e) => {
                        if self.generation() != generation {
                            // The socket was replaced while we were blocked;
                            // the error was ours, retry on the new one.
                            continue;
                        }
                        return Err(ShimError::Io(e));
                    }
                },
                _ = rebound.changed() => continue,
            }
        }
    }

    pub(crate) async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize, ShimError> {
        let mut rebound = self.rebound.subscribe();
        loop {
            let (socket, generation) = self.current()?;
            tokio::select! {
                res = socket.send_to(buf, dest) => match res {
                    Ok(n) => return Ok(n),
                    Err(e) => {
                        if self.generation() != generation {
                            continue;
                        }
                        return Err(ShimError::Io(e));
                    }
                },
                _ = rebound.changed() => continue,
            }
        }
    }
}
