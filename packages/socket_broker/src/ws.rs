//! Real WebSocket transport for the broker, over tokio-tungstenite.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{
    CLOSE_ABNORMAL, Connector, TransportCommand, TransportEvent, TransportHandle,
};

/// Connects brokers to real WebSocket endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> impl Future<Output = Result<TransportHandle, TransportError>> + Send {
        let url = url.to_string();
        async move {
            let (stream, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            debug!(url = %url, "websocket established");

            let (mut ws_write, mut ws_read) = stream.split();
            let (command_tx, mut command_rx) = mpsc::channel::<TransportCommand>(32);
            let cancel = CancellationToken::new();

            // Writer: drains transport commands into the socket.
            let writer_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let cmd = tokio::select! {
                        cmd = command_rx.recv() => cmd,
                        _ = writer_cancel.cancelled() => break,
                    };
                    match cmd {
                        Some(TransportCommand::Send {
                            payload,
                            respond_to,
                        }) => {
                            let result = ws_write
                                .send(tungstenite::Message::Binary(payload.into()))
                                .await
                                .map_err(|e| TransportError::WriteFailed(e.to_string()));
                            let _ = respond_to.send(result);
                        }
                        Some(TransportCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            let _ = ws_write
                                .send(tungstenite::Message::Close(Some(frame)))
                                .await;
                            break;
                        }
                        None => {
                            // The broker released the transport.
                            let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                            break;
                        }
                    }
                }
                writer_cancel.cancel();
            });

            // Reader: inbound frames become transport events.
            let reader_cancel = cancel;
            tokio::spawn(async move {
                let closed = loop {
                    let frame = tokio::select! {
                        frame = ws_read.next() => frame,
                        _ = reader_cancel.cancelled() => break None,
                    };
                    match frame {
                        Some(Ok(tungstenite::Message::Binary(data))) => {
                            let event = TransportEvent::Message {
                                payload: data.to_vec(),
                            };
                            if events.send(event).await.is_err() {
                                break None;
                            }
                        }
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            let event = TransportEvent::Message {
                                payload: text.as_bytes().to_vec(),
                            };
                            if events.send(event).await.is_err() {
                                break None;
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            break Some(match frame {
                                Some(f) => (u16::from(f.code), f.reason.to_string()),
                                // Close without a status code.
                                None => (1005, String::new()),
                            });
                        }
                        // Ping/pong is answered by tungstenite itself.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            break Some((CLOSE_ABNORMAL, e.to_string()));
                        }
                        None => break Some((CLOSE_ABNORMAL, "connection reset".to_string())),
                    }
                };
                if let Some((code, reason)) = closed {
                    let _ = events.send(TransportEvent::Closed { code, reason }).await;
                }
                reader_cancel.cancel();
            });

            Ok(TransportHandle::new(command_tx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn echo_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    tungstenite::Message::Binary(data) => {
                        ws.send(tungstenite::Message::Binary(data)).await.unwrap();
                    }
                    tungstenite::Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        let (event_tx, mut event_rx) = mpsc::channel(32);
        let handle = WsConnector
            .connect(&format!("ws://{addr}"), event_tx)
            .await
            .expect("connect failed");

        handle.send(b"ping".to_vec()).await.expect("send failed");
        match next_event(&mut event_rx).await {
            TransportEvent::Message { payload } => assert_eq!(payload, b"ping"),
            other => panic!("expected echoed message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connect_is_reported() {
        // Bind then drop so nothing listens on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (event_tx, _event_rx) = mpsc::channel(32);
        let err = WsConnector
            .connect(&format!("ws://{addr}"), event_tx)
            .await
            .err()
            .expect("connect must fail");
        assert!(matches!(err, TransportError::ConnectFailed(_)));
    }

    #[tokio::test]
    async fn server_close_surfaces_code_and_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            }))
            .await
            .unwrap();
        });

        let (event_tx, mut event_rx) = mpsc::channel(32);
        let _handle = WsConnector
            .connect(&format!("ws://{addr}"), event_tx)
            .await
            .expect("connect failed");

        match next_event(&mut event_rx).await {
            TransportEvent::Closed { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "done");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }
}
