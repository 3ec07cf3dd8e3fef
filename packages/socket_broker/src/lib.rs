//! Connection sharing for messaging clients.
//!
//! Several independent consumers can behave as if each owned a private
//! connection while a single real transport serves all of them. A broker
//! actor owns the transport for its endpoint; consumers reach it over
//! message passing only: requests get exactly one response, lifecycle and
//! inbound data fan out to every subscriber.
//!
//! # Example
//!
//! ```no_run
//! use socket_broker::{SocketBroker, WsConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = SocketBroker::spawn(WsConnector);
//!
//!     let (_id, mut notifications) = broker.subscribe().await.unwrap();
//!     let reused = broker.connect("wss://gateway.example.com").await.unwrap();
//!     assert!(!reused);
//!
//!     broker.send_data(b"hello".to_vec()).await.unwrap();
//!     while let Some(note) = notifications.recv().await {
//!         println!("{note:?}");
//!     }
//! }
//! ```

mod broker;
mod error;
pub mod protocol;
mod registry;
pub mod remote;
mod transport;
mod ws;

#[cfg(test)]
mod test_util;

pub use broker::{BrokerConfig, BrokerHandle, ConnectionState, SocketBroker, SubscriberId};
pub use error::{BrokerError, TransportError, WireError};
pub use protocol::{BrokerNotification, BrokerRequest, WireMessage};
pub use registry::BrokerRegistry;
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, Connector, TransportCommand, TransportEvent, TransportHandle,
};
pub use ws::WsConnector;
