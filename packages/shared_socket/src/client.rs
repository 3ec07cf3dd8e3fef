//! The duplex-connection contract consumers program against.

use std::future::Future;

use socket_broker::BrokerError;

use crate::metrics::MetricsSnapshot;

/// Events a client surfaces to its owning context.
#[derive(Clone, Debug)]
pub enum SocketEvent {
    /// The connection is open and usable.
    Open,
    /// The connection is gone.
    Closed { code: u16, reason: String },
    /// One inbound message.
    Message { payload: Vec<u8> },
}

/// Errors surfaced by a socket client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SocketError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("connection broker is gone")]
    BrokerGone,
}

impl From<BrokerError> for SocketError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::ConnectFailed(message) => Self::ConnectFailed(message),
            BrokerError::NotConnected => Self::NotConnected,
            BrokerError::SendFailed(message) => Self::SendFailed(message),
            BrokerError::BrokerGone => Self::BrokerGone,
        }
    }
}

/// Capability contract for a duplex connection.
///
/// Every connection variant exposes exactly this surface, whether it owns
/// a real socket or proxies a shared one; callers depend only on the
/// trait.
pub trait SocketClient {
    /// Local view: the connection is being established.
    fn is_connecting(&self) -> bool;

    /// Local view: the connection is open.
    fn is_connected(&self) -> bool;

    /// This client's own traffic counters.
    fn metrics(&self) -> MetricsSnapshot;

    /// Write one message.
    fn send(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Release the connection from this client's point of view.
    fn close(&self);
}
