//! Newline-framed control protocol.
//!
//! Each control message is a single self-describing JSON object terminated by
//! `\n`. The framing rides on the first bidirectional stream of a QUIC
//! connection, which already provides ordering and reliability, so nothing
//! beyond line splitting is needed. Receivers ignore unknown fields and skip
//! unknown `type` values to stay forward-compatible.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::trace;

use crate::errors::ShimError;

/// Hard cap on a single control line. Control messages are tiny; the cap only
/// guards against a runaway peer.
pub const MAX_CONTROL_LINE: usize = 1024 * 1024;

/// A control-plane message exchanged between the shim halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// First message on a client's control stream, identifying the client.
    Hello { client_id: String },
    /// Server announcement that the service is about to move to
    /// `new_addr:new_port`.
    Migrate {
        id: String,
        new_addr: String,
        new_port: u16,
    },
    /// Client acknowledgement that the migrate with `ack_id` was observed.
    Ack { ack_id: String },
    /// Cut-over order: promote the armed peer. Also accepted on the
    /// out-of-band commit side channel.
    Commit { id: String },
}

/// On-the-wire shape. All payload fields are optional so that decoding stays
/// tolerant of messages from older or newer peers; the conversion into
/// [`ControlMessage`] fills absent fields with empty values, matching the
/// behaviour of the protocol's other implementations.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ack_id: Option<String>,
}

impl ControlMessage {
    /// Serializes the message to a single line, without the terminator.
    pub fn encode(&self) -> Result<String, ShimError> {
        let wire = match self {
            ControlMessage::Hello { client_id } => WireMessage {
                kind: "hello".into(),
                client_id: Some(client_id.clone()),
                ..WireMessage::default()
            },
            ControlMessage::Migrate {
                id,
                new_addr,
                new_port,
            } => WireMessage {
                kind: "migrate".into(),
                id: Some(id.clone()),
                new_addr: Some(new_addr.clone()),
                new_port: Some(*new_port),
                ..WireMessage::default()
            },
            ControlMessage::Ack { ack_id } => WireMessage {
                kind: "ack".into(),
                ack_id: Some(ack_id.clone()),
                ..WireMessage::default()
            },
            ControlMessage::Commit { id } => WireMessage {
                kind: "commit".into(),
                id: Some(id.clone()),
                ..WireMessage::default()
            },
        };
        serde_json::to_string(&wire).map_err(|e| ShimError::Decode(e.to_string()))
    }

    /// Decodes one line. Returns `Ok(None)` for a recognized frame of an
    /// unknown `type`, which receivers skip rather than treat as an error.
    pub fn decode(line: &str) -> Result<Option<ControlMessage>, ShimError> {
        let wire: WireMessage =
            serde_json::from_str(line).map_err(|e| ShimError::Decode(e.to_string()))?;
        let msg = match wire.kind.as_str() {
            "hello" => ControlMessage::Hello {
                client_id: wire.client_id.unwrap_or_default(),
            },
            "migrate" => ControlMessage::Migrate {
                id: wire.id.unwrap_or_default(),
                new_addr: wire.new_addr.unwrap_or_default(),
                new_port: wire.new_port.unwrap_or_default(),
            },
            "ack" => ControlMessage::Ack {
                ack_id: wire.ack_id.unwrap_or_default(),
            },
            "commit" => ControlMessage::Commit {
                id: wire.id.unwrap_or_default(),
            },
            other => {
                trace!(kind = other, "skipping unknown control message type");
                return Ok(None);
            }
        };
        Ok(Some(msg))
    }
}

/// Writes one message as `json + '\n'`.
///
/// The write is a single `write_all`; when several tasks share the writer the
/// caller is expected to hold a per-stream write lock around this call.
pub async fn write_message<W>(writer: &mut W, msg: &ControlMessage) -> Result<(), ShimError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = msg.encode()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Pull-based reader side of the control protocol.
///
/// Empty lines and unknown message types are skipped internally; a malformed
/// line surfaces [`ShimError::Decode`] but leaves the reader usable, so the
/// caller chooses between skipping the line and dropping the connection. A
/// line above [`MAX_CONTROL_LINE`] is a fatal framing error.
pub struct ControlReader<R> {
    frames: FramedRead<R, LinesCodec>,
}

impl<R> ControlReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            frames: FramedRead::new(inner, LinesCodec::new_with_max_length(MAX_CONTROL_LINE)),
        }
    }

    /// Reads the next control message, or `Ok(None)` once the peer closes.
    pub async fn next(&mut self) -> Result<Option<ControlMessage>, ShimError> {
        while let Some(frame) = self.frames.next().await {
            let line = match frame {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Err(ShimError::FrameTooLong(MAX_CONTROL_LINE))
                }
                Err(LinesCodecError::Io(e)) => return Err(ShimError::Io(e)),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ControlMessage::decode(line)? {
                Some(msg) => return Ok(Some(msg)),
                None => continue,
            }
        }
        Ok(None)
    }
}
