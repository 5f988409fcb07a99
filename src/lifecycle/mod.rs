//! Triggers that drive the endpoints from outside the data path.
//!
//! The orchestrator never calls into the shim directly; it raises signals at
//! the server process and sends one-shot datagrams at the client host. The
//! adapters here translate those into plain method calls on the endpoints and
//! the session registry. Server-side installers must run before the QUIC
//! listener accepts its first connection so no trigger can race the first
//! session.

mod commit;
#[cfg(unix)]
mod signals;
mod watchdog;

pub use commit::CommitListener;
#[cfg(unix)]
pub use signals::{spawn_migrate_on_sigterm, spawn_rebind_on_sigusr2};
pub use watchdog::CutoverWatchdog;
