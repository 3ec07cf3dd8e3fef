//! The seam between the broker and a real socket.
//!
//! The broker is the only holder of a [`TransportHandle`]; consumers reach
//! the socket exclusively through broker requests and notifications.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;

/// Close code for deliberate teardown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for connect failures and torn transports.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Events surfaced by a live transport to its owning broker.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// One complete inbound message.
    Message { payload: Vec<u8> },
    /// The connection is gone: remote close, local close, or a read error.
    Closed { code: u16, reason: String },
}

/// Messages handled by a transport's writer task.
#[derive(Debug)]
pub enum TransportCommand {
    Send {
        payload: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), TransportError>>,
    },
    Close {
        code: u16,
        reason: String,
    },
}

/// Write-side handle to a live transport.
#[derive(Clone)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(sender: mpsc::Sender<TransportCommand>) -> Self {
        Self { sender }
    }

    /// Write one message, waiting for the write to be acknowledged.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TransportCommand::Send {
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Ask the transport to close. Best effort: a transport that is
    /// already gone is not an error.
    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .sender
            .send(TransportCommand::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

/// Creates transports on behalf of a broker.
///
/// Implementations deliver inbound traffic and closure through `events`
/// and return the write-side handle.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl Future<Output = Result<TransportHandle, TransportError>> + Send;
}
