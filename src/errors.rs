use std::time::Duration;
use thiserror::Error;

/// Error type shared by the endpoint façades and the control plane.
///
/// The hot-path operations (`send`/`recv`) recover transient socket errors
/// internally; everything surfaced here is either terminal for the operation
/// or actionable by the caller.
#[derive(Debug, Error)]
pub enum ShimError {
    /// The endpoint was closed; no further operations are possible.
    #[error("endpoint closed")]
    Closed,

    /// The kernel refused to create or bind the replacement socket during a
    /// rebind. The previous socket remains installed and usable.
    #[error("rebind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// A send was attempted before any real peer was configured.
    #[error("no real peer configured")]
    NoPeer,

    /// A control line exceeded the framing cap.
    #[error("control line exceeds {0} bytes")]
    FrameTooLong(usize),

    /// A control line was present but could not be decoded. The stream stays
    /// usable; the caller may skip the line or drop the connection.
    #[error("malformed control message: {0}")]
    Decode(String),

    /// The control stream failed at the transport level; the session is over.
    #[error("control stream error: {0}")]
    Stream(String),

    /// A migrate announcement was not acknowledged within the configured
    /// window. Informational: endpoint state is unaffected.
    #[error("migrate {id} not acknowledged within {waited:?}")]
    AckTimeout { id: String, waited: Duration },

    /// Underlying I/O failure that is not one of the recoverable kinds.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShimError {
    /// True for errors that mean the operation hit a hard deadline rather
    /// than a broken endpoint.
    pub fn is_timeout(&self) -> bool {
        match self {
            ShimError::AckTimeout { .. } => true,
            ShimError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}
