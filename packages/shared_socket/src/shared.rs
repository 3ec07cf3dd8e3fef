//! A socket that is really a window onto a shared connection.
//!
//! Every context holds its own [`SharedSocket`]; a single real transport,
//! owned by the broker, serves all of them. The proxy never touches the
//! transport: it issues requests and mirrors notifications into local
//! state, so `is_connecting`/`is_connected` are plain reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use socket_broker::{
    BrokerError, BrokerHandle, BrokerNotification, CLOSE_ABNORMAL, SubscriberId,
};

use crate::client::{SocketClient, SocketError, SocketEvent};
use crate::metrics::{MetricsSnapshot, SocketMetrics};

/// Flags mirrored from broker notifications.
#[derive(Debug, Default)]
struct LocalState {
    connecting: AtomicBool,
    connected: AtomicBool,
}

/// Per-context facade over a shared connection.
pub struct SharedSocket {
    broker: BrokerHandle,
    subscriber: SubscriberId,
    state: Arc<LocalState>,
    metrics: Arc<SocketMetrics>,
}

impl SharedSocket {
    /// Subscribe to `broker`, request a connection to `url`, and hand back
    /// the proxy plus its owner-facing event stream.
    ///
    /// A connect failure is not an error here: it surfaces exactly once as
    /// [`SocketEvent::Closed`] with code 1006 and the failure's message,
    /// the same way an unexpected close would.
    pub async fn open(
        url: &str,
        broker: BrokerHandle,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketEvent>), SocketError> {
        let (subscriber, notifications) = broker.subscribe().await?;
        let state = Arc::new(LocalState::default());
        let metrics = Arc::new(SocketMetrics::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let listener = Listener {
            state: state.clone(),
            metrics: metrics.clone(),
            events: event_tx,
            connect_start: None,
            open_emitted: false,
            closed_emitted: false,
        };
        tokio::spawn(listener.run(notifications, outcome_rx));

        // The subscription is already live, so the connect outcome and all
        // later lifecycle changes reach the listener in broker order.
        let outcome = broker.connect(url).await;
        let _ = outcome_tx.send(outcome);

        Ok((
            Self {
                broker,
                subscriber,
                state,
                metrics,
            },
            event_rx,
        ))
    }

    /// The connection, as this context last observed it.
    pub fn is_connecting(&self) -> bool {
        self.state.connecting.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    /// This context's own counters; siblings sharing the connection keep
    /// theirs separately.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Write one message on the shared connection.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), SocketError> {
        let len = payload.len();
        self.broker.send_data(payload).await?;
        self.metrics.record_sent(len);
        Ok(())
    }

    /// Does nothing: other contexts may still depend on the shared
    /// connection. Use [`SharedSocket::unsubscribe`] to drop out of it.
    pub fn close(&self) {}

    /// Remove this proxy's subscription. Once the last subscriber is gone
    /// the broker tears the transport down.
    pub async fn unsubscribe(self) -> Result<(), SocketError> {
        self.broker.unsubscribe(self.subscriber).await?;
        Ok(())
    }
}

impl SocketClient for SharedSocket {
    fn is_connecting(&self) -> bool {
        SharedSocket::is_connecting(self)
    }

    fn is_connected(&self) -> bool {
        SharedSocket::is_connected(self)
    }

    fn metrics(&self) -> MetricsSnapshot {
        SharedSocket::metrics(self)
    }

    fn send(
        &self,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), SocketError>> + Send {
        SharedSocket::send(self, payload)
    }

    fn close(&self) {
        SharedSocket::close(self)
    }
}

/// Applies broker notifications and the connect outcome to local state,
/// emitting owner events exactly once per open and per close.
struct Listener {
    state: Arc<LocalState>,
    metrics: Arc<SocketMetrics>,
    events: mpsc::UnboundedSender<SocketEvent>,
    connect_start: Option<Instant>,
    open_emitted: bool,
    closed_emitted: bool,
}

impl Listener {
    async fn run(
        mut self,
        mut notifications: mpsc::UnboundedReceiver<BrokerNotification>,
        mut outcome: oneshot::Receiver<Result<bool, BrokerError>>,
    ) {
        let mut outcome_pending = true;

        loop {
            tokio::select! {
                // Notifications queued before the connect response must be
                // applied first, so the response never rolls state back.
                biased;

                note = notifications.recv() => match note {
                    Some(note) => self.apply_notification(note),
                    None => break,
                },
                result = &mut outcome, if outcome_pending => {
                    outcome_pending = false;
                    if let Ok(result) = result {
                        self.apply_outcome(result);
                    }
                }
            }
        }

        // Broker gone: this proxy can never be connected again.
        self.state.connecting.store(false, Ordering::Relaxed);
        self.state.connected.store(false, Ordering::Relaxed);
        debug!("shared socket listener stopped");
    }

    fn apply_notification(&mut self, note: BrokerNotification) {
        match note {
            BrokerNotification::Connecting => {
                self.connect_start = Some(Instant::now());
                self.state.connecting.store(true, Ordering::Relaxed);
                self.state.connected.store(false, Ordering::Relaxed);
                self.closed_emitted = false;
            }
            BrokerNotification::Connected => {
                self.state.connecting.store(false, Ordering::Relaxed);
                self.state.connected.store(true, Ordering::Relaxed);
                if let Some(start) = self.connect_start.take() {
                    self.metrics
                        .record_connect_time(start.elapsed().as_millis() as u64);
                }
                self.emit_open();
            }
            BrokerNotification::Closed { code, reason } => {
                self.reset_local();
                self.emit_closed(code, reason);
            }
            BrokerNotification::DataReceived { payload } => {
                self.metrics.record_received(payload.len());
                let _ = self.events.send(SocketEvent::Message { payload });
            }
        }
    }

    fn apply_outcome(&mut self, outcome: Result<bool, BrokerError>) {
        match outcome {
            Ok(reused) => {
                // A close that already superseded this response wins.
                if self.closed_emitted {
                    return;
                }
                self.state.connecting.store(false, Ordering::Relaxed);
                self.state.connected.store(true, Ordering::Relaxed);
                if reused {
                    // The connection predates this subscriber; no
                    // Connecting/Connected will ever be delivered to it.
                    self.emit_open();
                }
            }
            Err(err) => {
                // The broker's own close broadcast, if any, was already
                // applied; only surface a failure nobody else reported.
                if self.open_emitted {
                    return;
                }
                self.reset_local();
                self.emit_closed(CLOSE_ABNORMAL, err.reason());
            }
        }
    }

    fn emit_open(&mut self) {
        if !self.open_emitted {
            self.open_emitted = true;
            self.closed_emitted = false;
            let _ = self.events.send(SocketEvent::Open);
        }
    }

    fn emit_closed(&mut self, code: u16, reason: String) {
        if !self.closed_emitted {
            self.closed_emitted = true;
            self.open_emitted = false;
            let _ = self.events.send(SocketEvent::Closed { code, reason });
        }
    }

    fn reset_local(&mut self) {
        self.connect_start = None;
        self.state.connecting.store(false, Ordering::Relaxed);
        self.state.connected.store(false, Ordering::Relaxed);
        self.metrics.reset();
    }
}
