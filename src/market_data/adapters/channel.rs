use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Connection, Transport};
use crate::market_data::error::TransportError;
use crate::market_data::types::{Frame, TransportEvent};

/// In-memory transport. Every successful `open` hands the server end of the
/// new connection to the paired [`ServerAcceptor`], which lets a test (or a
/// local simulator) push frames, errors and closes, and read what the client
/// sent.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    accepted: mpsc::UnboundedSender<ServerSide>,
    state: Arc<Mutex<ChannelState>>,
    event_buffer: usize,
}

#[derive(Debug, Default)]
struct ChannelState {
    opens: usize,
    refuse_next: usize,
    endpoints: Vec<String>,
}

impl ChannelTransport {
    pub fn new(event_buffer: usize) -> (Self, ServerAcceptor) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let transport = Self {
            accepted,
            state: Arc::new(Mutex::new(ChannelState::default())),
            event_buffer: event_buffer.max(1),
        };
        (transport, ServerAcceptor { rx })
    }

    /// Makes the next `n` opens fail.
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse_next = n;
    }

    /// Open attempts so far, failed ones included.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().endpoints.clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, endpoint: &str) -> Result<Connection, TransportError> {
        {
            let mut state = self.state.lock();
            state.opens += 1;
            state.endpoints.push(endpoint.to_string());
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                return Err(TransportError::Connect("connection refused".to_string()));
            }
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(self.event_buffer);
        let closer = CancellationToken::new();

        let server = ServerSide {
            events: in_tx,
            sent: out_rx,
            closed: closer.clone(),
        };
        self.accepted
            .send(server)
            .map_err(|_| TransportError::Connect("acceptor dropped".to_string()))?;

        Ok(Connection::new(out_tx, in_rx, closer))
    }
}

/// Receives the server end of each connection in open order.
#[derive(Debug)]
pub struct ServerAcceptor {
    rx: mpsc::UnboundedReceiver<ServerSide>,
}

impl ServerAcceptor {
    pub async fn accept(&mut self) -> Option<ServerSide> {
        self.rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ServerSide> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct ServerSide {
    events: mpsc::Sender<TransportEvent>,
    sent: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl ServerSide {
    pub async fn send_frame(&self, frame: Frame) -> bool {
        self.push(TransportEvent::Frame(frame)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(Frame::Text(text.into())).await
    }

    pub async fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.send_frame(Frame::Binary(bytes)).await
    }

    pub async fn error(&self, reason: impl Into<String>) -> bool {
        self.push(TransportEvent::Error(reason.into())).await
    }

    pub async fn close(&self, reason: Option<String>) -> bool {
        self.push(TransportEvent::Closed(reason)).await
    }

    /// Next text message the client sent.
    pub async fn recv_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub fn closed_by_client(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn wait_closed_by_client(&self) {
        self.closed.cancelled().await
    }

    async fn push(&self, event: TransportEvent) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.events.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_both_directions() {
        let (transport, mut acceptor) = ChannelTransport::new(8);
        let mut conn = transport.open("mem://feed").await.unwrap();
        let mut server = acceptor.accept().await.unwrap();

        conn.send("hello".into()).await.unwrap();
        assert_eq!(server.recv_sent().await.as_deref(), Some("hello"));

        assert!(server.send_text("{}").await);
        assert!(matches!(conn.recv().await, Some(TransportEvent::Frame(Frame::Text(_)))));

        conn.close();
        assert!(server.closed_by_client());
        assert!(!server.send_text("{}").await);
        assert_eq!(transport.endpoints(), vec!["mem://feed".to_string()]);
    }

    #[tokio::test]
    async fn refused_opens_count_and_fail() {
        let (transport, mut acceptor) = ChannelTransport::new(8);
        transport.refuse_next(2);
        assert!(transport.open("a").await.is_err());
        assert!(transport.open("a").await.is_err());
        assert!(transport.open("a").await.is_ok());
        assert_eq!(transport.opens(), 3);
        assert!(acceptor.try_accept().is_some());
        assert!(acceptor.try_accept().is_none());
    }

    #[tokio::test]
    async fn dropping_the_connection_closes_it() {
        let (transport, mut acceptor) = ChannelTransport::new(8);
        let conn = transport.open("a").await.unwrap();
        let server = acceptor.accept().await.unwrap();
        drop(conn);
        assert!(server.closed_by_client());
    }
}
