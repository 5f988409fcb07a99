//! UDP socket façades presented to the QUIC stack.
//!
//! Both façades keep the upward-facing contract of an unconnected UDP socket
//! stable while the control plane replaces what sits underneath: the
//! [`RebindableEndpoint`] swaps its kernel socket (server side, after a
//! checkpoint/restore), the [`SwappableEndpoint`] swaps the remote address it
//! actually talks to (client side). The QUIC stack is never told about either
//! swap.

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::ShimError;

mod addr;
mod rebindable;
mod slot;
mod swappable;

pub use rebindable::RebindableEndpoint;
pub use swappable::SwappableEndpoint;

pub(crate) use addr::same_host_port;

/// The datagram endpoint contract a QUIC stack drives.
///
/// Implementations are safe for fully concurrent use; socket replacement and
/// peer swaps stay invisible apart from the brief internal retry. Deadlines
/// are absolute instants; an expired deadline surfaces as [`ShimError::Io`]
/// with kind `TimedOut`, and `None` clears it.
#[async_trait]
pub trait DatagramEndpoint: Send + Sync {
    /// Receives one datagram, reporting its source address.
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), ShimError>;

    /// Sends one datagram towards `dest`.
    ///
    /// Peer-swapping implementations ignore `dest` and address the datagram
    /// themselves.
    async fn send(&self, buf: &[u8], dest: SocketAddr) -> Result<usize, ShimError>;

    /// The local address of the current underlying socket.
    fn local_addr(&self) -> Result<SocketAddr, ShimError>;

    /// Terminal close; all further operations fail with [`ShimError::Closed`].
    fn close(&self) -> Result<(), ShimError>;

    fn set_read_deadline(&self, deadline: Option<Instant>);
    fn set_write_deadline(&self, deadline: Option<Instant>);

    /// Sets both directions at once.
    fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }
}

/// Per-direction absolute deadlines shared by both façades.
#[derive(Default)]
pub(crate) struct Deadlines {
    read: Mutex<Option<Instant>>,
    write: Mutex<Option<Instant>>,
}

impl Deadlines {
    pub(crate) fn set_read(&self, deadline: Option<Instant>) {
        *self.read.lock().unwrap() = deadline;
    }

    pub(crate) fn set_write(&self, deadline: Option<Instant>) {
        *self.write.lock().unwrap() = deadline;
    }

    pub(crate) fn read(&self) -> Option<Instant> {
        *self.read.lock().unwrap()
    }

    pub(crate) fn write(&self) -> Option<Instant> {
        *self.write.lock().unwrap()
    }
}

/// Runs `fut` under an optional absolute deadline.
pub(crate) async fn with_deadline<F, T>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<T, ShimError>
where
    F: std::future::Future<Output = Result<T, ShimError>>,
{
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, fut).await {
            Ok(res) => res,
            Err(_) => Err(ShimError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "deadline exceeded",
            ))),
        },
        None => fut.await,
    }
}
