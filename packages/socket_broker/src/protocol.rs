//! Wire contract between connection consumers and the broker.
//!
//! Two message kinds only: requests, which get exactly one response each,
//! and notifications, which fan out to every subscriber with no reply.
//! The framed form carries the protocol across contexts that share no
//! memory (threads, processes, or anything that can move bytes).

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Requests executed by the broker against the shared transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerRequest {
    /// Ensure a connection to `url` exists. The response result is `true`
    /// when an existing live connection was recognized.
    Connect { url: String },

    /// Write one message on the shared transport.
    SendData { payload: Vec<u8> },
}

/// Lifecycle and data notifications broadcast to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerNotification {
    Connecting,
    Connected,
    Closed { code: u16, reason: String },
    DataReceived { payload: Vec<u8> },
}

/// Envelope for the framed form of the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    /// One sender, one receiver, exactly one eventual response carrying
    /// the same `id`.
    Request { id: u64, request: BrokerRequest },

    /// Resolution of the request with the same `id`: a result on success,
    /// an error body otherwise.
    Response {
        id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    /// One sender, many receivers, no reply.
    Notification { notification: BrokerNotification },
}

impl WireMessage {
    pub fn response_ok(id: u64, result: Option<serde_json::Value>) -> Self {
        Self::Response {
            id,
            ok: true,
            result,
            error: None,
        }
    }

    pub fn response_err(id: u64, message: String) -> Self {
        Self::Response {
            id,
            ok: false,
            result: None,
            error: Some(WireError { message }),
        }
    }
}

/// Frames larger than this are rejected outright.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Write a length-prefixed `WireMessage` to a byte stream.
pub async fn write_wire_message<W>(stream: &mut W, msg: &WireMessage) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(msg)?;
    let len = (bytes.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a length-prefixed `WireMessage` from a byte stream.
/// Returns None on clean stream close.
pub async fn read_wire_message<R>(stream: &mut R) -> anyhow::Result<Option<WireMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        anyhow::bail!("wire message too large: {} bytes", len);
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    match serde_json::from_slice(&buf) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            tracing::warn!(error = %e, "malformed wire message");
            Ok(None)
        }
    }
}
