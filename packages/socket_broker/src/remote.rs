//! Bridging a broker across contexts that share no memory.
//!
//! [`serve_broker`] exposes a local broker on one end of a byte stream;
//! [`connect_remote`] turns the other end back into a [`BrokerHandle`].
//! Requests travel as correlated request/response envelopes, notifications
//! fan out as notification envelopes, and a consumer built on the bridged
//! handle behaves exactly like one built on an in-process handle.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::broker::{BrokerCommand, BrokerHandle, ConnectionState, SubscriberId};
use crate::error::BrokerError;
use crate::protocol::{
    BrokerNotification, BrokerRequest, WireMessage, read_wire_message, write_wire_message,
};

/// Serve a local broker to the far end of `stream` until the stream or the
/// broker goes away.
///
/// The far context counts as one subscriber of the local broker for as
/// long as the stream lives, however many consumers it fans out to.
pub async fn serve_broker<S>(broker: BrokerHandle, stream: S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (subscriber, mut notifications) = broker
        .subscribe()
        .await
        .map_err(|e| anyhow::anyhow!("subscribe failed: {e}"))?;

    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound) = mpsc::channel::<WireMessage>(64);

    // Single writer: responses and forwarded notifications interleave here.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if write_wire_message(&mut write_half, &msg).await.is_err() {
                break;
            }
        }
    });

    let notifier_tx = outbound_tx.clone();
    let notifier = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            let msg = WireMessage::Notification { notification };
            if notifier_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let result = loop {
        let msg = match read_wire_message(&mut read_half).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        match msg {
            WireMessage::Request { id, request } => {
                let response = execute(&broker, id, request).await;
                if outbound_tx.send(response).await.is_err() {
                    break Ok(());
                }
            }
            other => {
                warn!(?other, "unexpected message from the consumer side");
            }
        }
    };

    let _ = broker.unsubscribe(subscriber).await;
    notifier.abort();
    drop(outbound_tx);
    let _ = writer.await;
    result
}

async fn execute(broker: &BrokerHandle, id: u64, request: BrokerRequest) -> WireMessage {
    match request {
        BrokerRequest::Connect { url } => match broker.connect(&url).await {
            Ok(reused) => WireMessage::response_ok(id, Some(serde_json::Value::Bool(reused))),
            Err(err) => WireMessage::response_err(id, err.reason()),
        },
        BrokerRequest::SendData { payload } => match broker.send_data(payload).await {
            Ok(()) => WireMessage::response_ok(id, None),
            Err(err) => WireMessage::response_err(id, err.reason()),
        },
    }
}

/// Turn the consumer end of `stream` into a broker handle.
///
/// A bridge task assigns every outgoing request a fresh correlation id,
/// keeps its pending resolver, and resolves it exactly once from the
/// matching response envelope. Notifications fan out to local subscribers;
/// connection state is mirrored from them. Stream loss rejects everything
/// pending.
pub fn connect_remote<S>(stream: S) -> BrokerHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, commands) = mpsc::channel(32);
    tokio::spawn(run_bridge(stream, commands));
    BrokerHandle::new(sender)
}

enum Pending {
    Connect(oneshot::Sender<Result<bool, BrokerError>>),
    Send(oneshot::Sender<Result<(), BrokerError>>),
}

struct RemoteBridge<W> {
    write: W,
    next_id: u64,
    pending: HashMap<u64, Pending>,
    mirrored: ConnectionState,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<BrokerNotification>>,
    next_subscriber: u64,
}

async fn run_bridge<S>(stream: S, mut commands: mpsc::Receiver<BrokerCommand>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);
    let (inbound_tx, mut inbound) = mpsc::channel::<WireMessage>(64);

    let reader = tokio::spawn(async move {
        loop {
            match read_wire_message(&mut read_half).await {
                Ok(Some(msg)) => {
                    if inbound_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "broker channel read failed");
                    break;
                }
            }
        }
    });

    let mut bridge = RemoteBridge {
        write: write_half,
        next_id: 1,
        pending: HashMap::new(),
        mirrored: ConnectionState::Idle,
        subscribers: HashMap::new(),
        next_subscriber: 1,
    };

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => {
                    if bridge.handle_command(cmd).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            msg = inbound.recv() => match msg {
                Some(msg) => bridge.handle_inbound(msg),
                None => break,
            },
        }
    }

    // The channel to the owning context is gone; nothing pending resolves.
    bridge.fail_pending();
    bridge.subscribers.clear();
    reader.abort();
    debug!("remote bridge stopped");
}

impl<W: AsyncWrite + Unpin> RemoteBridge<W> {
    async fn handle_command(&mut self, cmd: BrokerCommand) -> anyhow::Result<()> {
        match cmd {
            BrokerCommand::Connect { url, respond_to } => {
                self.send_request(BrokerRequest::Connect { url }, Pending::Connect(respond_to))
                    .await
            }
            BrokerCommand::SendData {
                payload,
                respond_to,
            } => {
                self.send_request(
                    BrokerRequest::SendData { payload },
                    Pending::Send(respond_to),
                )
                .await
            }
            BrokerCommand::Subscribe { respond_to } => {
                let id = SubscriberId(self.next_subscriber);
                self.next_subscriber += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers.insert(id, tx);
                let _ = respond_to.send((id, rx));
                Ok(())
            }
            BrokerCommand::Unsubscribe { id, respond_to } => {
                let _ = respond_to.send(self.subscribers.remove(&id).is_some());
                Ok(())
            }
            BrokerCommand::State { respond_to } => {
                let _ = respond_to.send(self.mirrored.clone());
                Ok(())
            }
        }
    }

    async fn send_request(&mut self, request: BrokerRequest, pending: Pending) -> anyhow::Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let msg = WireMessage::Request { id, request };
        if let Err(e) = write_wire_message(&mut self.write, &msg).await {
            reject(pending, BrokerError::BrokerGone);
            return Err(e);
        }
        self.pending.insert(id, pending);
        Ok(())
    }

    fn handle_inbound(&mut self, msg: WireMessage) {
        match msg {
            WireMessage::Response {
                id,
                ok,
                result,
                error,
            } => {
                let Some(entry) = self.pending.remove(&id) else {
                    warn!(id, "response for an unknown request");
                    return;
                };
                let message = error.map(|e| e.message).unwrap_or_default();
                match entry {
                    Pending::Connect(tx) => {
                        let outcome = if ok {
                            Ok(result.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
                        } else {
                            Err(BrokerError::ConnectFailed(message))
                        };
                        let _ = tx.send(outcome);
                    }
                    Pending::Send(tx) => {
                        let outcome = if ok {
                            Ok(())
                        } else {
                            Err(BrokerError::SendFailed(message))
                        };
                        let _ = tx.send(outcome);
                    }
                }
            }
            WireMessage::Notification { notification } => {
                self.mirror(&notification);
                let mut dead = Vec::new();
                for (id, sink) in &self.subscribers {
                    if sink.send(notification.clone()).is_err() {
                        dead.push(*id);
                    }
                }
                for id in dead {
                    self.subscribers.remove(&id);
                }
            }
            WireMessage::Request { id, .. } => {
                warn!(id, "requests from the owning side are not supported");
            }
        }
    }

    fn mirror(&mut self, notification: &BrokerNotification) {
        match notification {
            BrokerNotification::Connecting => self.mirrored = ConnectionState::Connecting,
            BrokerNotification::Connected => self.mirrored = ConnectionState::Connected,
            BrokerNotification::Closed { code, reason } => {
                self.mirrored = ConnectionState::Closed {
                    code: *code,
                    reason: reason.clone(),
                };
            }
            BrokerNotification::DataReceived { .. } => {}
        }
    }

    fn fail_pending(&mut self) {
        for (_, entry) in self.pending.drain() {
            reject(entry, BrokerError::BrokerGone);
        }
    }
}

fn reject(pending: Pending, err: BrokerError) {
    match pending {
        Pending::Connect(tx) => {
            let _ = tx.send(Err(err));
        }
        Pending::Send(tx) => {
            let _ = tx.send(Err(err));
        }
    }
}
