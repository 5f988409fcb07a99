//! Per-connection control-stream state machines.
//!
//! The first bidirectional stream of every QUIC connection carries the
//! control protocol; all later streams belong to the application. The server
//! side announces migrations and observes acknowledgements, the client side
//! arms and commits the peer swap. Both sides are generic over the stream
//! halves, so any QUIC implementation whose streams speak
//! `AsyncRead`/`AsyncWrite` plugs in directly.

mod client;
mod server;

pub use client::ClientControl;
pub use server::{ControlSession, MigrateOutcome, SessionHandle, SessionRegistry};
