//! A per-context socket facade over a shared connection.
//!
//! Every context (tab, worker, task) holds its own [`SharedSocket`] with
//! its own state flags, metrics, and event stream, while one real
//! transport owned by a `socket_broker` broker serves all of them.
//! `close()` is deliberately a no-op; a proxy drops out of the shared
//! connection by unsubscribing.
//!
//! # Example
//!
//! ```no_run
//! use shared_socket::{SharedSocket, SocketEvent};
//! use socket_broker::{BrokerRegistry, WsConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = BrokerRegistry::new(WsConnector);
//!     let broker = registry.broker_for("wss://gateway.example.com").await;
//!
//!     let (socket, mut events) = SharedSocket::open("wss://gateway.example.com", broker)
//!         .await
//!         .unwrap();
//!     socket.send(b"hello".to_vec()).await.unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SocketEvent::Open => println!("open"),
//!             SocketEvent::Message { payload } => println!("{} bytes", payload.len()),
//!             SocketEvent::Closed { code, reason } => {
//!                 println!("closed: {code} {reason}");
//!                 break;
//!             }
//!         }
//!     }
//! }
//! ```

mod client;
mod metrics;
mod shared;


pub use client::{SocketClient, SocketError, SocketEvent};
pub use metrics::{MetricsSnapshot, SocketMetrics};
pub use shared::SharedSocket;
