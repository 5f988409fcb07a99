use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{write_message, ControlMessage, ControlReader};
use crate::endpoint::SwappableEndpoint;
use crate::errors::ShimError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Client half of the control stream, driving the peer-swapping endpoint.
///
/// On start it introduces itself with `hello`, then a background loop reacts
/// to the server's announcements:
///
/// - `migrate` fires the migrate-seen latch (exactly once per session), arms
///   the announced address on the endpoint and acknowledges. The real peer is
///   left untouched so traffic keeps flowing to the old address until the
///   cut-over.
/// - `commit` promotes the armed peer, for deployments that deliver the
///   cut-over order in-band instead of through the side channel.
///
/// Everything else on the stream is ignored; malformed lines are skipped.
pub struct ClientControl {
    endpoint: Arc<SwappableEndpoint>,
    migrate_seen: CancellationToken,
    done: CancellationToken,
    reader_task: JoinHandle<()>,
}

impl ClientControl {
    /// Writes `hello` and starts the reader loop. `reader`/`writer` are the
    /// halves of the connection's first bidirectional stream.
    pub async fn start<R, W>(
        reader: R,
        writer: W,
        client_id: &str,
        endpoint: Arc<SwappableEndpoint>,
    ) -> Result<Self, ShimError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut writer = Box::new(writer) as BoxedWriter;
        write_message(
            &mut writer,
            &ControlMessage::Hello {
                client_id: client_id.to_string(),
            },
        )
        .await
        .map_err(|e| ShimError::Stream(e.to_string()))?;

        let migrate_seen = CancellationToken::new();
        let done = CancellationToken::new();
        let reader_task = tokio::spawn(read_loop(
            ControlReader::new(reader),
            writer,
            Arc::clone(&endpoint),
            migrate_seen.clone(),
            done.clone(),
        ));
        Ok(Self {
            endpoint,
            migrate_seen,
            done,
            reader_task,
        })
    }

    /// One-shot latch that fires when the first `migrate` arrives. The
    /// application can use it to tighten I/O deadlines during the blackout
    /// window; the cut-over watchdog keys on it.
    pub fn migrate_seen(&self) -> CancellationToken {
        self.migrate_seen.clone()
    }

    pub fn endpoint(&self) -> &Arc<SwappableEndpoint> {
        &self.endpoint
    }

    /// Whether the control stream has terminated.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }
}

impl Drop for ClientControl {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(
    mut reader: ControlReader<impl AsyncRead + Unpin>,
    mut writer: BoxedWriter,
    endpoint: Arc<SwappableEndpoint>,
    migrate_seen: CancellationToken,
    done: CancellationToken,
) {
    loop {
        match reader.next().await {
            Ok(Some(ControlMessage::Migrate {
                id,
                new_addr,
                new_port,
            })) => {
                info!(id = %id, new_addr = %new_addr, new_port, "migrate announced");
                migrate_seen.cancel();
                match resolve_peer(&new_addr, new_port).await {
                    Ok(peer) => endpoint.arm(peer),
                    Err(e) => {
                        warn!(error = %e, new_addr = %new_addr, new_port, "cannot resolve announced peer")
                    }
                }
                // Ack promptly either way: it only records that the
                // announcement was observed, so the orchestrator can proceed
                // with the checkpoint.
                let ack = ControlMessage::Ack { ack_id: id };
                if let Err(e) = write_message(&mut writer, &ack).await {
                    debug!(error = %e, "failed to write ack");
                    break;
                }
            }
            Ok(Some(ControlMessage::Commit { id })) => {
                if endpoint.commit() {
                    info!(id = %id, peer = ?endpoint.real_peer(), "in-band commit; cut over");
                } else {
                    debug!(id = %id, "in-band commit with nothing to promote");
                }
            }
            // hello/ack are client-to-server only.
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(ShimError::Decode(e)) => {
                warn!(error = %e, "skipping malformed control line");
            }
            Err(e) => {
                debug!(error = %e, "control stream terminated");
                break;
            }
        }
    }
    done.cancel();
}

/// Resolves the textual host + port from a `migrate` announcement. Accepts
/// dotted-decimal, bracketed or bare IPv6, and resolvable host names.
async fn resolve_peer(host: &str, port: u16) -> Result<SocketAddr, ShimError> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let target = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let resolved = tokio::net::lookup_host(&target).await?.next();
    resolved.ok_or_else(|| {
        ShimError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses for {target}"),
        ))
    })
}
