use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::SessionRegistry;
use crate::endpoint::RebindableEndpoint;

/// Installs the post-restore trigger: every SIGUSR2 rebinds the server
/// endpoint's kernel socket.
///
/// Raising the signal repeatedly is safe; each delivery produces a fresh
/// socket. A failed rebind is logged and leaves the current socket in place.
pub fn spawn_rebind_on_sigusr2(
    endpoint: Arc<RebindableEndpoint>,
    shutdown: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let mut sig = signal(SignalKind::user_defined2())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = sig.recv() => {
                    if received.is_none() {
                        break;
                    }
                    if let Err(e) = endpoint.rebind().await {
                        warn!(error = %e, "rebind trigger failed; keeping current socket");
                    }
                }
            }
        }
    }))
}

/// Installs the pre-checkpoint trigger: every SIGTERM broadcasts a `migrate`
/// announcing `new_addr:new_port` to all live control sessions and waits for
/// each ack-or-timeout before the orchestrator proceeds with the dump.
pub fn spawn_migrate_on_sigterm(
    registry: Arc<SessionRegistry>,
    new_addr: String,
    new_port: u16,
    ack_timeout: Duration,
    shutdown: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let mut sig = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = sig.recv() => {
                    if received.is_none() {
                        break;
                    }
                    if registry.is_empty() {
                        info!("migrate trigger with no active sessions");
                        continue;
                    }
                    let outcomes = registry
                        .broadcast_migrate(&new_addr, new_port, ack_timeout)
                        .await;
                    let acked = outcomes.iter().filter(|o| o.acked).count();
                    info!(
                        sessions = outcomes.len(),
                        acked,
                        "migrate broadcast complete"
                    );
                }
            }
        }
    }))
}
