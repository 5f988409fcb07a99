//! # quicshim: connection-preserving migration for QUIC services
//!
//! A shim that sits between a QUIC stack and the operating-system UDP socket
//! on both ends of a moving service, so that a checkpoint/restore of the
//! server process (landing on a different host, address or port) stays
//! invisible to QUIC. The cryptographic session, congestion state and stream
//! state all carry across the move; the observable downtime is the blackout
//! window of the checkpoint itself.
//!
//! ## How it works
//!
//! Neither side tears anything down. Instead, each side hides one change
//! under its QUIC stack:
//!
//! - the **server** reads and writes through a [`RebindableEndpoint`], whose
//!   kernel socket can be atomically replaced after the restore (a new
//!   network namespace invalidates the old one). Concurrent reads and writes
//!   ride over the swap with an internal retry keyed on a generation
//!   counter.
//! - the **client** reads and writes through a [`SwappableEndpoint`], which
//!   forwards datagrams to a mutable *real peer* while reporting a fixed
//!   *logical peer* upward, so QUIC never sees the path change.
//!
//! A tiny newline-framed protocol on the first bidirectional stream of each
//! connection coordinates the two: the server announces `migrate` before the
//! dump, the client arms the new address and acknowledges, and an
//! out-of-band `commit` (or a business I/O failure after the announcement)
//! triggers the cut-over.
//!
//! ## Server side
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quicshim::{
//!     RebindableEndpoint, ServerConfig, SessionRegistry,
//!     spawn_migrate_on_sigterm, spawn_rebind_on_sigusr2,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env();
//! let endpoint = Arc::new(RebindableEndpoint::bind(config.listen_addr).await?);
//! let registry = SessionRegistry::new();
//! let shutdown = CancellationToken::new();
//!
//! // Install the triggers before the QUIC listener accepts anything.
//! spawn_rebind_on_sigusr2(Arc::clone(&endpoint), shutdown.clone())?;
//! spawn_migrate_on_sigterm(
//!     Arc::clone(&registry),
//!     config.announce_addr.clone(),
//!     config.announce_port,
//!     config.ack_timeout,
//!     shutdown.clone(),
//! )?;
//!
//! // Hand `endpoint` to the QUIC listener as its UDP socket. For each
//! // accepted connection, wrap its first bidirectional stream and keep the
//! // registration guard for the connection's lifetime:
//! // let session = ControlSession::start(read_half, write_half);
//! // let _session_guard = registry.register(session);
//! # Ok(())
//! # }
//! ```
//!
//! ## Client side
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quicshim::{ClientConfig, ClientControl, CommitListener, SwappableEndpoint};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(read_half: tokio::io::DuplexStream, write_half: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env();
//! let target = "127.0.0.1:4242".parse()?;
//! let endpoint = Arc::new(SwappableEndpoint::connect(target).await?);
//!
//! // Dial QUIC through `endpoint`, open the first bidirectional stream and
//! // hand its halves to the control loop.
//! let control = ClientControl::start(
//!     read_half, write_half, &config.client_id, Arc::clone(&endpoint),
//! ).await?;
//!
//! // Let the orchestrator order the cut-over out of band.
//! let shutdown = CancellationToken::new();
//! let listener = CommitListener::bind(config.commit_listen_addr).await?;
//! tokio::spawn(listener.run(Arc::clone(&endpoint), shutdown.clone()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Scope
//!
//! The checkpoint/restore engine, container orchestration, TLS material and
//! the application's business streams are external collaborators. The QUIC
//! stack is consumed through the [`DatagramEndpoint`] contract and ordinary
//! `AsyncRead`/`AsyncWrite` stream halves; the shim works with any stack
//! that can drive a user-supplied UDP socket.

pub mod codec;
pub mod config;
pub mod control;
pub mod endpoint;
pub mod errors;
pub mod lifecycle;
pub mod trace;

pub use codec::{write_message, ControlMessage, ControlReader, MAX_CONTROL_LINE};
pub use config::{
    ClientConfig, ServerConfig, DEFAULT_ACK_TIMEOUT, DEFAULT_ANNOUNCE_PORT,
    DEFAULT_COMMIT_LISTEN_ADDR, DEFAULT_KEEP_ALIVE_PERIOD, DEFAULT_LISTEN_ADDR,
};
pub use control::{ClientControl, ControlSession, MigrateOutcome, SessionHandle, SessionRegistry};
pub use endpoint::{DatagramEndpoint, RebindableEndpoint, SwappableEndpoint};
pub use errors::ShimError;
pub use lifecycle::{CommitListener, CutoverWatchdog};
#[cfg(unix)]
pub use lifecycle::{spawn_migrate_on_sigterm, spawn_rebind_on_sigusr2};
