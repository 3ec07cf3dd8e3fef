//! In-memory transports for exercising the broker without a network.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;
use crate::transport::{Connector, TransportCommand, TransportEvent, TransportHandle};

/// Connector whose transports are driven by the test: writes are recorded,
/// inbound traffic and closure are injected through the held event sender.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    /// Physical connects performed so far.
    pub(crate) connects: Arc<AtomicUsize>,
    /// When set, the next connect fails with this message.
    pub(crate) fail_with: Arc<Mutex<Option<String>>>,
    /// When true, writes are rejected with a broken pipe.
    pub(crate) fail_writes: Arc<AtomicBool>,
    /// Every payload written on the live transport, in order.
    pub(crate) sent: Arc<Mutex<Vec<Vec<u8>>>>,
    remote: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Deliver one inbound message on the live transport.
    pub(crate) async fn push_message(&self, payload: &[u8]) {
        let remote = self.remote.lock().await;
        let events = remote.as_ref().expect("no live transport");
        events
            .send(TransportEvent::Message {
                payload: payload.to_vec(),
            })
            .await
            .expect("broker dropped the event channel");
    }

    /// Close the live transport from the far side.
    pub(crate) async fn close_remote(&self, code: u16, reason: &str) {
        let remote = self.remote.lock().await;
        let events = remote.as_ref().expect("no live transport");
        let _ = events
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        _url: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl Future<Output = Result<TransportHandle, TransportError>> + Send {
        let this = self.clone();
        async move {
            if let Some(message) = this.fail_with.lock().await.clone() {
                return Err(TransportError::ConnectFailed(message));
            }
            this.connects.fetch_add(1, Ordering::SeqCst);
            *this.remote.lock().await = Some(events.clone());

            let (command_tx, mut command_rx) = mpsc::channel(32);
            tokio::spawn(async move {
                while let Some(cmd) = command_rx.recv().await {
                    match cmd {
                        TransportCommand::Send {
                            payload,
                            respond_to,
                        } => {
                            if this.fail_writes.load(Ordering::SeqCst) {
                                let _ = respond_to.send(Err(TransportError::WriteFailed(
                                    "broken pipe".to_string(),
                                )));
                            } else {
                                this.sent.lock().await.push(payload);
                                let _ = respond_to.send(Ok(()));
                            }
                        }
                        TransportCommand::Close { code, reason } => {
                            let _ = events.send(TransportEvent::Closed { code, reason }).await;
                            break;
                        }
                    }
                }
            });

            Ok(TransportHandle::new(command_tx))
        }
    }
}
