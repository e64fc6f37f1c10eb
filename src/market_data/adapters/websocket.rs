use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Connection, Transport};
use crate::market_data::error::TransportError;
use crate::market_data::types::{Frame, TransportEvent};

const OUTBOUND_BUFFER: usize = 64;

/// Websocket transport backed by tokio-tungstenite.
///
/// Each open spawns one pump task that owns both halves of the socket:
/// queued outbound text is written, inbound messages become
/// [`TransportEvent`]s, and cancelling the connection's close token sends a
/// close frame and ends the task.
#[derive(Debug, Clone)]
pub struct WsTransport {
    event_buffer: usize,
}

impl WsTransport {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            event_buffer: event_buffer.max(1),
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(4_096)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str) -> Result<Connection, TransportError> {
        let (ws, _resp) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(endpoint, "websocket connected");

        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(self.event_buffer);
        let closer = CancellationToken::new();
        let token = closer.clone();
        let endpoint = endpoint.to_string();

        tokio::spawn(async move {
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(endpoint = %endpoint, "closing websocket");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(text) = out_rx.recv() => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(endpoint = %endpoint, error = %e, "websocket send failed");
                            if in_tx.send(TransportEvent::Error(e.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    msg = read.next() => {
                        let event = match msg {
                            Some(Ok(Message::Text(text))) => TransportEvent::Frame(Frame::Text(text.as_str().to_owned())),
                            Some(Ok(Message::Binary(bytes))) => TransportEvent::Frame(Frame::Binary(bytes.to_vec())),
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = write.send(Message::Pong(payload)).await;
                                continue;
                            }
                            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
                                let _ = in_tx.send(TransportEvent::Closed(reason)).await;
                                break;
                            }
                            Some(Err(e)) => {
                                let reason = e.to_string();
                                let _ = in_tx.send(TransportEvent::Error(reason.clone())).await;
                                let _ = in_tx.send(TransportEvent::Closed(Some(reason))).await;
                                break;
                            }
                            None => {
                                let _ = in_tx.send(TransportEvent::Closed(None)).await;
                                break;
                            }
                        };
                        if in_tx.send(event).await.is_err() {
                            debug!(endpoint = %endpoint, "connection handle dropped, stopping pump");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(Connection::new(out_tx, in_rx, closer))
    }
}
