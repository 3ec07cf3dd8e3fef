//! Error types for transport operations and broker requests.

use serde::{Deserialize, Serialize};

/// Errors raised by a real transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("transport closed")]
    Closed,
}

/// Errors returned for broker requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("broker is gone")]
    BrokerGone,
}

impl BrokerError {
    /// The raw failure text, without the operation prefix. Consumers put
    /// this in the `reason` of a synthesized close.
    pub fn reason(&self) -> String {
        match self {
            Self::ConnectFailed(message) | Self::SendFailed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Serializable error body carried by wire responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
}
