use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::market_data::types::PongReply;

/// Answers server pings on whichever connection is currently open.
///
/// The connection supervisor attaches the outbound half of each connection
/// when it opens and detaches it when it goes away. With nothing attached a
/// ping is simply not answered; if the server gives up on us, the resulting
/// close is handled by the reconnect path.
#[derive(Clone, Debug, Default)]
pub struct HeartbeatResponder {
    link: Arc<Mutex<Option<mpsc::Sender<String>>>>,
}

impl HeartbeatResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, outbound: mpsc::Sender<String>) {
        *self.link.lock() = Some(outbound);
    }

    pub fn detach(&self) {
        self.link.lock().take();
    }

    /// Sends the pong. Returns whether it was handed to an open transport.
    pub fn respond(&self, timestamp: &str) -> bool {
        let Some(outbound) = self.link.lock().clone() else {
            debug!(timestamp, "no open transport, ping left unanswered");
            return false;
        };

        let payload = match serde_json::to_string(&PongReply::echo(timestamp)) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode pong");
                return false;
            }
        };

        match outbound.try_send(payload) {
            Ok(()) => {
                debug!(timestamp, "pong sent");
                crate::metrics::record_pong_sent();
                true
            }
            Err(e) => {
                debug!(timestamp, error = %e, "pong not sent");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn echoes_timestamp_as_string() {
        let hb = HeartbeatResponder::new();
        let (tx, mut rx) = mpsc::channel(4);
        hb.attach(tx);

        assert!(hb.respond("1690000000000"));
        let sent: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent["pong"], json!("1690000000000"));
        assert_eq!(sent["topic"], json!("pong"));
        assert_eq!(sent["compression"], json!(1));
    }

    #[test]
    fn no_transport_is_a_silent_no_op() {
        let hb = HeartbeatResponder::new();
        assert!(!hb.respond("1"));

        let (tx, rx) = mpsc::channel(1);
        hb.attach(tx);
        drop(rx);
        assert!(!hb.respond("2"));

        let (tx, mut rx) = mpsc::channel(1);
        hb.attach(tx);
        hb.detach();
        assert!(!hb.respond("3"));
        assert!(rx.try_recv().is_err());
    }
}
