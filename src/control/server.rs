use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{write_message, ControlMessage, ControlReader};
use crate::errors::ShimError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type AckWaiters = Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>;

/// Result of one migrate announcement.
///
/// The acknowledgement is observational: it tells the orchestrator that the
/// client saw the announcement before the checkpoint, nothing more. A missing
/// ack therefore produces `acked: false` rather than an error.
#[derive(Debug, Clone)]
pub struct MigrateOutcome {
    pub id: String,
    pub acked: bool,
    pub waited: Duration,
}

impl MigrateOutcome {
    /// For callers that treat the missing ack as an error after all.
    pub fn require_ack(self) -> Result<Self, ShimError> {
        if self.acked {
            Ok(self)
        } else {
            Err(ShimError::AckTimeout {
                id: self.id,
                waited: self.waited,
            })
        }
    }
}

/// Server half of one connection's control stream.
///
/// A background task reads the stream, recording the client's `hello` and
/// resolving the ack waiter matching each `ack`. Unmatched acks are dropped.
/// The session ends when the stream closes or errors; outstanding waiters
/// then resolve as not-acked.
pub struct ControlSession {
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    waiters: AckWaiters,
    client_id: Arc<Mutex<Option<String>>>,
    done: CancellationToken,
    reader_task: JoinHandle<()>,
}

impl ControlSession {
    /// Takes ownership of the control stream halves and starts the reader
    /// loop.
    pub fn start<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let waiters: AckWaiters = Arc::new(Mutex::new(HashMap::new()));
        let client_id = Arc::new(Mutex::new(None));
        let done = CancellationToken::new();
        let reader_task = tokio::spawn(read_loop(
            ControlReader::new(reader),
            Arc::clone(&waiters),
            Arc::clone(&client_id),
            done.clone(),
        ));
        Arc::new(Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer) as BoxedWriter)),
            waiters,
            client_id,
            done,
            reader_task,
        })
    }

    /// The id announced by the client's `hello`, once received.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().unwrap().clone()
    }

    /// Whether the control stream has terminated.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Announces a migration to `new_addr:new_port` and waits up to
    /// `ack_timeout` for the matching acknowledgement.
    ///
    /// The waiter is registered before the `migrate` line is written, so an
    /// immediate ack cannot be missed, and it is removed exactly once whether
    /// it resolves, times out, or the session dies first. Only a write
    /// failure is an error.
    pub async fn send_migrate_and_wait(
        &self,
        new_addr: &str,
        new_port: u16,
        ack_timeout: Duration,
    ) -> Result<MigrateOutcome, ShimError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id.clone(), tx);

        let msg = ControlMessage::Migrate {
            id: id.clone(),
            new_addr: new_addr.to_string(),
            new_port,
        };
        let started = Instant::now();
        let written = {
            let mut writer = self.writer.lock().await;
            write_message(&mut *writer, &msg).await
        };
        if let Err(e) = written {
            self.waiters.lock().unwrap().remove(&id);
            return Err(ShimError::Stream(e.to_string()));
        }

        let acked = tokio::select! {
            res = rx => res.is_ok(),
            _ = tokio::time::sleep(ack_timeout) => false,
            _ = self.done.cancelled() => false,
        };
        self.waiters.lock().unwrap().remove(&id);

        let waited = started.elapsed();
        if acked {
            info!(id = %id, waited_ms = waited.as_millis() as u64, "migrate acknowledged");
        } else {
            warn!(id = %id, waited_ms = waited.as_millis() as u64, "migrate not acknowledged");
        }
        Ok(MigrateOutcome { id, acked, waited })
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(
    mut reader: ControlReader<impl AsyncRead + Unpin>,
    waiters: AckWaiters,
    client_id: Arc<Mutex<Option<String>>>,
    done: CancellationToken,
) {
    loop {
        match reader.next().await {
            Ok(Some(ControlMessage::Ack { ack_id })) => {
                let waiter = waiters.lock().unwrap().remove(&ack_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(());
                    }
                    None => debug!(ack_id = %ack_id, "dropping unmatched ack"),
                }
            }
            Ok(Some(ControlMessage::Hello { client_id: id })) => {
                debug!(client_id = %id, "control stream hello");
                *client_id.lock().unwrap() = Some(id);
            }
            // Clients do not send migrate/commit upstream.
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

type SessionMap = Arc<Mutex<HashMap<Uuid, Arc<ControlSession>>>>;

/// The set of live control sessions, one per accepted QUIC connection.
///
/// The lifecycle triggers broadcast through this registry; the accept loop
/// registers a session as soon as the connection's first stream opens and
/// holds the returned guard until the connection goes away.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: SessionMap,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a session and returns the guard that removes it again. The
    /// accept loop keeps the guard for the lifetime of the connection, so a
    /// dying connection unregisters its session the moment the guard drops.
    pub fn register(&self, session: Arc<ControlSession>) -> SessionHandle {
        let key = Uuid::new_v4();
        self.sessions.lock().unwrap().insert(key, session);
        SessionHandle {
            sessions: Arc::clone(&self.sessions),
            key,
        }
    }

    fn unregister(&self, key: Uuid) {
        self.sessions.lock().unwrap().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Announces the migration on every live session and waits for each
    /// ack-or-timeout. Sessions whose stream already terminated are pruned.
    pub async fn broadcast_migrate(
        &self,
        new_addr: &str,
        new_port: u16,
        ack_timeout: Duration,
    ) -> Vec<MigrateOutcome> {
        let snapshot: Vec<(Uuid, Arc<ControlSession>)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .iter()
                .map(|(k, s)| (*k, Arc::clone(s)))
                .collect()
        };

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for (key, session) in snapshot {
            if session.is_closed() {
                self.unregister(key);
                continue;
            }
            match session
                .send_migrate_and_wait(new_addr, new_port, ack_timeout)
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "failed to announce migrate; dropping session");
                    self.unregister(key);
                }
            }
        }
        outcomes
    }
}

/// Registration guard for one control session.
///
/// Dropping the handle removes the session from its registry, so tying the
/// handle's lifetime to the connection task gives per-connection cleanup
/// without any explicit bookkeeping in the accept loop.
pub struct SessionHandle {
    sessions: SessionMap,
    key: Uuid,
}

impl SessionHandle {
    /// Removes the session now instead of at end of scope.
    pub fn unregister(self) {}
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.sessions.lock().unwrap().remove(&self.key);
    }
}
