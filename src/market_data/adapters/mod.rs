pub mod channel;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::market_data::error::TransportError;
use crate::market_data::types::TransportEvent;

pub use channel::{ChannelTransport, ServerAcceptor, ServerSide};
pub use websocket::WsTransport;

/// Opens streaming connections. The returned [`Connection`] is already open;
/// everything after that arrives as [`TransportEvent`]s.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<Connection, TransportError>;
}

/// One open connection: text out, events in.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
    closer: CancellationToken,
}

impl Connection {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            closer,
        }
    }

    pub fn outbound(&self) -> mpsc::Sender<String> {
        self.outbound.clone()
    }

    pub async fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Send("connection closed".to_string()))
    }

    /// Next event; `None` once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Fire-and-forget close. Safe to call any number of times, including on
    /// a connection the peer already closed.
    pub fn close(&self) {
        self.closer.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}
