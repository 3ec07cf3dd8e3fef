//! The connection-ownership broker.
//!
//! Exactly one broker owns the real transport for an endpoint. Consumers
//! reach it through a [`BrokerHandle`]: requests are commands carrying a
//! oneshot responder, lifecycle and data fan out as notifications to every
//! subscriber. The actor processes one command or transport event at a
//! time, so no two connects can race to create two transports.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{BrokerError, TransportError};
use crate::protocol::BrokerNotification;
use crate::transport::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, Connector, TransportEvent, TransportHandle,
};

/// Identifies one notification subscriber.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Authoritative state of the shared connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closed { code: u16, reason: String },
}

impl ConnectionState {
    /// A transport exists (or is being created) in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Commands handled by the broker actor.
pub(crate) enum BrokerCommand {
    Connect {
        url: String,
        respond_to: oneshot::Sender<Result<bool, BrokerError>>,
    },
    SendData {
        payload: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), BrokerError>>,
    },
    Subscribe {
        respond_to:
            oneshot::Sender<(SubscriberId, mpsc::UnboundedReceiver<BrokerNotification>)>,
    },
    Unsubscribe {
        id: SubscriberId,
        respond_to: oneshot::Sender<bool>,
    },
    State {
        respond_to: oneshot::Sender<ConnectionState>,
    },
}

/// Tunables for a broker actor.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Capacity of the command channel.
    pub command_capacity: usize,
    /// Capacity of the transport event channel.
    pub event_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_capacity: 32,
            event_capacity: 256,
        }
    }
}

/// Handle to communicate with a broker actor.
#[derive(Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    pub(crate) fn new(sender: mpsc::Sender<BrokerCommand>) -> Self {
        Self { sender }
    }

    /// Ensure a connection to `url` exists. Returns `true` when an
    /// existing live connection was recognized, `false` when this call
    /// created it.
    pub async fn connect(&self, url: &str) -> Result<bool, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Connect {
                url: url.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| BrokerError::BrokerGone)?;
        rx.await.map_err(|_| BrokerError::BrokerGone)?
    }

    /// Write one message on the shared transport.
    pub async fn send_data(&self, payload: Vec<u8>) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::SendData {
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|_| BrokerError::BrokerGone)?;
        rx.await.map_err(|_| BrokerError::BrokerGone)?
    }

    /// Register for all notifications of this endpoint.
    pub async fn subscribe(
        &self,
    ) -> Result<(SubscriberId, mpsc::UnboundedReceiver<BrokerNotification>), BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Subscribe { respond_to: tx })
            .await
            .map_err(|_| BrokerError::BrokerGone)?;
        rx.await.map_err(|_| BrokerError::BrokerGone)
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<bool, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Unsubscribe { id, respond_to: tx })
            .await
            .map_err(|_| BrokerError::BrokerGone)?;
        rx.await.map_err(|_| BrokerError::BrokerGone)
    }

    /// Snapshot of the authoritative connection state.
    pub async fn state(&self) -> Result<ConnectionState, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::State { respond_to: tx })
            .await
            .map_err(|_| BrokerError::BrokerGone)?;
        rx.await.map_err(|_| BrokerError::BrokerGone)
    }
}

/// The broker actor owning the sole real transport for one endpoint.
pub struct SocketBroker<C: Connector> {
    connector: C,
    config: BrokerConfig,
    state: ConnectionState,
    url: Option<String>,
    transport: Option<TransportHandle>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<BrokerNotification>>,
    next_subscriber: u64,
    receiver: mpsc::Receiver<BrokerCommand>,
}

impl<C: Connector> SocketBroker<C> {
    /// Spawn a broker actor and return its handle.
    pub fn spawn(connector: C) -> BrokerHandle {
        Self::spawn_with(connector, BrokerConfig::default())
    }

    pub fn spawn_with(connector: C, config: BrokerConfig) -> BrokerHandle {
        let (sender, receiver) = mpsc::channel(config.command_capacity);
        let broker = Self {
            connector,
            config,
            state: ConnectionState::Idle,
            url: None,
            transport: None,
            events: None,
            subscribers: HashMap::new(),
            next_subscriber: 1,
            receiver,
        };
        tokio::spawn(broker.run());
        BrokerHandle::new(sender)
    }

    async fn run(mut self) {
        debug!("broker started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                event = next_event(&mut self.events) => self.handle_event(event).await,
            }
        }

        // Every handle is gone; nothing can reach the transport anymore.
        if let Some(transport) = self.transport.take() {
            transport.close(CLOSE_NORMAL, "broker shut down").await;
        }
        debug!("broker stopped");
    }

    async fn handle_command(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Connect { url, respond_to } => {
                let result = self.handle_connect(url).await;
                let _ = respond_to.send(result);
            }

            BrokerCommand::SendData {
                payload,
                respond_to,
            } => {
                let result = self.handle_send(payload).await;
                let _ = respond_to.send(result);
            }

            BrokerCommand::Subscribe { respond_to } => {
                let id = SubscriberId(self.next_subscriber);
                self.next_subscriber += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers.insert(id, tx);
                debug!(%id, "subscriber added");
                let _ = respond_to.send((id, rx));
            }

            BrokerCommand::Unsubscribe { id, respond_to } => {
                let removed = self.subscribers.remove(&id).is_some();
                if removed {
                    debug!(%id, "subscriber removed");
                    self.release_if_abandoned().await;
                }
                let _ = respond_to.send(removed);
            }

            BrokerCommand::State { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
        }
    }

    async fn handle_connect(&mut self, url: String) -> Result<bool, BrokerError> {
        if self.state.is_live() {
            if self.url.as_deref() != Some(url.as_str()) {
                debug!(requested = %url, "connect for a different url, reusing the live connection");
            }
            return Ok(true);
        }

        info!(url = %url, "opening transport");
        self.set_state(ConnectionState::Connecting);
        self.notify(BrokerNotification::Connecting);

        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        match self.connector.connect(&url, event_tx).await {
            Ok(handle) => {
                self.transport = Some(handle);
                self.events = Some(event_rx);
                self.url = Some(url);
                self.set_state(ConnectionState::Connected);
                self.notify(BrokerNotification::Connected);
                Ok(false)
            }
            Err(err) => {
                let reason = match err {
                    TransportError::ConnectFailed(message) => message,
                    other => other.to_string(),
                };
                self.set_state(ConnectionState::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: reason.clone(),
                });
                self.notify(BrokerNotification::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: reason.clone(),
                });
                Err(BrokerError::ConnectFailed(reason))
            }
        }
    }

    async fn handle_send(&mut self, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.state != ConnectionState::Connected {
            return Err(BrokerError::NotConnected);
        }
        let transport = self.transport.as_ref().ok_or(BrokerError::NotConnected)?;
        transport.send(payload).await.map_err(|err| match err {
            TransportError::WriteFailed(message) => BrokerError::SendFailed(message),
            other => BrokerError::SendFailed(other.to_string()),
        })
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { payload } => {
                self.notify(BrokerNotification::DataReceived { payload });
                self.release_if_abandoned().await;
            }
            TransportEvent::Closed { code, reason } => {
                info!(code, reason = %reason, "transport closed");
                self.transport = None;
                self.events = None;
                self.set_state(ConnectionState::Closed {
                    code,
                    reason: reason.clone(),
                });
                self.notify(BrokerNotification::Closed { code, reason });
            }
        }
    }

    /// Fan out to every subscriber; one with a dropped receiver never
    /// prevents delivery to the others.
    fn notify(&mut self, notification: BrokerNotification) {
        let mut dead = Vec::new();
        for (id, sink) in &self.subscribers {
            if sink.send(notification.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            debug!(%id, "dropping dead subscriber");
            self.subscribers.remove(&id);
        }
    }

    /// Nobody is listening anymore: tear the transport down. The `Closed`
    /// event it produces completes the state transition.
    async fn release_if_abandoned(&mut self) {
        if self.subscribers.is_empty() {
            if let Some(transport) = &self.transport {
                info!("no remaining subscribers, closing transport");
                transport.close(CLOSE_NORMAL, "no remaining subscribers").await;
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!(from = ?self.state, to = ?state, "state change");
        self.state = state;
    }
}

/// Next transport event, or pend forever while no transport is live. A
/// torn event channel reads as an abnormal close.
async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match events {
        Some(rx) => match rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: "transport terminated".to_string(),
            },
        },
        None => std::future::pending().await,
    }
}
