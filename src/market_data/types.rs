use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;

use crate::market_data::error::DecodeError;

/// One message as delivered by the transport, before any decoding.
pub enum Frame {
    /// Text frame. Either plain JSON, or compressed bytes smuggled through a
    /// one-byte-per-character string.
    Text(String),
    /// Binary frame holding compressed bytes.
    Binary(Vec<u8>),
    /// Payload that only becomes available later as text.
    Deferred(BoxFuture<'static, Result<String, DecodeError>>),
}

impl Frame {
    pub fn deferred<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = Result<String, DecodeError>> + Send + 'static,
    {
        Frame::Deferred(Box::pin(fut))
    }

    pub fn encoding(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Deferred(_) => "deferred",
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Frame::Binary(b) => f.debug_tuple("Binary").field(&b.len()).finish(),
            Frame::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Everything a transport connection reports after it has opened.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(Frame),
    /// Error on an open connection. Recovery is driven by the `Closed` that
    /// follows, not by this event.
    Error(String),
    Closed(Option<String>),
}

/// Sent right after the connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub topic: String,
    pub event: String,
    pub chain_id: String,
    pub compression: u8,
}

impl SubscribeRequest {
    pub fn trending(chain_id: impl Into<String>) -> Self {
        Self {
            topic: "trending".to_string(),
            event: "sub".to_string(),
            chain_id: chain_id.into(),
            compression: 0,
        }
    }
}

/// Answer to a server ping; same envelope as the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PongReply {
    pub topic: String,
    pub event: String,
    pub pong: String,
    pub interval: String,
    pub pair: String,
    pub chain_id: String,
    pub compression: u8,
}

impl PongReply {
    pub fn echo(timestamp: impl Into<String>) -> Self {
        Self {
            topic: "pong".to_string(),
            event: "sub".to_string(),
            pong: timestamp.into(),
            interval: String::new(),
            pair: String::new(),
            chain_id: String::new(),
            compression: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(Option<String>),
}

/// What consumers see: the lifecycle state plus the last connection-level
/// error, which persists until the next successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected(None),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_request_wire_shape() {
        let v = serde_json::to_value(SubscribeRequest::trending("56")).unwrap();
        assert_eq!(
            v,
            json!({"topic": "trending", "event": "sub", "chainId": "56", "compression": 0})
        );
    }

    #[test]
    fn pong_reply_wire_shape() {
        let v = serde_json::to_value(PongReply::echo("1690000000000")).unwrap();
        assert_eq!(
            v,
            json!({
                "topic": "pong", "event": "sub", "pong": "1690000000000",
                "interval": "", "pair": "", "chainId": "", "compression": 1
            })
        );
    }
}
