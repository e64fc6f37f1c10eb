//! Connection supervisor.
//!
//! Owns the one live transport connection, the backoff timer and the status
//! signal. It is a single task multiplexing four inputs (shutdown, manual
//! reconnect commands, the backoff timer, transport events), so connects never
//! overlap and a cancelled timer can never fire behind its back.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::market_data::adapters::{Connection, Transport};
use crate::market_data::diagnostics::Diagnostics;
use crate::market_data::error::{FeedError, TransportError};
use crate::market_data::heartbeat::HeartbeatResponder;
use crate::market_data::reconnect::{BackoffPolicy, ReconnectScheduler};
use crate::market_data::types::{
    ConnectionState, ConnectionStatus, Frame, SubscribeRequest, TransportEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// User-triggered reconnect: skips any pending backoff.
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub chain_id: String,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

struct ActiveConnection {
    generation: u64,
    conn: Connection,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    frames: mpsc::Sender<Frame>,
    heartbeat: HeartbeatResponder,
    status: watch::Sender<ConnectionStatus>,
    diagnostics: Diagnostics,
    scheduler: ReconnectScheduler,
    active: Option<ActiveConnection>,
    generation: u64,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        frames: mpsc::Sender<Frame>,
        heartbeat: HeartbeatResponder,
        status: watch::Sender<ConnectionStatus>,
        diagnostics: Diagnostics,
    ) -> Self {
        let scheduler = ReconnectScheduler::new(settings.backoff);
        Self {
            settings,
            transport,
            frames,
            heartbeat,
            status,
            diagnostics,
            scheduler,
            active: None,
            generation: 0,
        }
    }

    /// Connects, then supervises until `shutdown` fires or every command
    /// sender is gone. On the way out the backoff timer is dropped and the
    /// transport closed before this returns.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        self.connect(&shutdown).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Reconnect) => self.reconnect_now(&shutdown).await,
                    None => break,
                },
                _ = self.scheduler.fired() => {
                    debug!(attempt = self.scheduler.attempts(), "backoff elapsed");
                    self.connect(&shutdown).await;
                }
                event = next_event(&mut self.active) => self.on_event(event).await,
            }
        }

        self.close();
        info!("connection manager stopped");
    }

    async fn connect(&mut self, shutdown: &CancellationToken) {
        self.drop_active();
        self.status.send_modify(|s| s.state = ConnectionState::Connecting);
        info!(endpoint = %self.settings.endpoint, "connecting");

        let timeout = self.settings.connect_timeout;
        let opened = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = tokio::time::timeout(timeout, self.transport.open(&self.settings.endpoint)) => {
                r.unwrap_or(Err(TransportError::Timeout(timeout)))
            }
        };

        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                let err = FeedError::TransportOpen(e);
                crate::metrics::record_connection_error("open");
                self.diagnostics.report(&err);
                let reason = err.to_string();
                self.status.send_replace(ConnectionStatus {
                    state: ConnectionState::Disconnected(Some(reason.clone())),
                    error: Some(reason),
                });
                self.scheduler.arm();
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;

        match serde_json::to_string(&SubscribeRequest::trending(&self.settings.chain_id)) {
            Ok(sub) => {
                if let Err(e) = conn.send(sub).await {
                    warn!(generation, error = %e, "subscription request not sent");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode subscription request"),
        }

        self.heartbeat.attach(conn.outbound());
        self.scheduler.on_open();
        self.status.send_replace(ConnectionStatus {
            state: ConnectionState::Connected,
            error: None,
        });
        crate::metrics::record_connection_open();
        info!(generation, chain_id = %self.settings.chain_id, "subscribed to trending feed");

        self.active = Some(ActiveConnection { generation, conn });
    }

    async fn reconnect_now(&mut self, shutdown: &CancellationToken) {
        info!(attempts = self.scheduler.attempts(), "manual reconnect");
        self.scheduler.cancel();
        self.connect(shutdown).await;
    }

    async fn on_event(&mut self, event: Option<TransportEvent>) {
        let generation = self.active.as_ref().map(|a| a.generation).unwrap_or_default();

        match event {
            Some(TransportEvent::Frame(frame)) => {
                if self.frames.send(frame).await.is_err() {
                    warn!(generation, "frame channel closed, dropping frame");
                }
            }
            Some(TransportEvent::Error(reason)) => {
                let err = FeedError::TransportRuntime(reason);
                crate::metrics::record_connection_error("runtime");
                self.diagnostics.report(&err);
                let msg = err.to_string();
                self.status.send_modify(|s| s.error = Some(msg));
            }
            Some(TransportEvent::Closed(reason)) => self.on_closed(generation, reason),
            None => self.on_closed(generation, Some("transport ended".to_string())),
        }
    }

    fn on_closed(&mut self, generation: u64, reason: Option<String>) {
        warn!(generation, reason = ?reason, "connection closed");
        self.drop_active();
        self.status
            .send_modify(|s| s.state = ConnectionState::Disconnected(reason));
        self.scheduler.arm();
    }

    /// Forgets the current connection without scheduling anything. Events it
    /// might still emit are never read.
    fn drop_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(generation = active.generation, "closing connection");
            self.heartbeat.detach();
            active.conn.close();
        }
    }

    /// Teardown. Never fails, whatever state the connection is in.
    pub fn close(&mut self) {
        self.scheduler.cancel();
        self.drop_active();
        self.status
            .send_modify(|s| s.state = ConnectionState::Disconnected(None));
    }
}

async fn next_event(active: &mut Option<ActiveConnection>) -> Option<TransportEvent> {
    match active {
        Some(a) => a.conn.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::{ChannelTransport, ServerAcceptor, ServerSide};
    use serde_json::{Value, json};

    struct Harness {
        transport: ChannelTransport,
        acceptor: ServerAcceptor,
        status: watch::Receiver<ConnectionStatus>,
        frames: mpsc::Receiver<Frame>,
        commands: mpsc::Sender<Command>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(refuse: usize) -> Harness {
        let (transport, acceptor) = ChannelTransport::new(16);
        transport.refuse_next(refuse);
        let (frames_tx, frames) = mpsc::channel(16);
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (commands, commands_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let manager = ConnectionManager::new(
            ConnectionSettings {
                endpoint: "mem://trending".into(),
                chain_id: "56".into(),
                connect_timeout: Duration::from_secs(5),
                backoff: BackoffPolicy::default(),
            },
            Arc::new(transport.clone()),
            frames_tx,
            HeartbeatResponder::new(),
            status_tx,
            Diagnostics::new(),
        );
        let task = tokio::spawn(manager.run(commands_rx, shutdown.clone()));

        Harness { transport, acceptor, status, frames, commands, shutdown, task }
    }

    async fn wait_connected(h: &mut Harness) {
        h.status.wait_for(|s| s.connected()).await.unwrap();
    }

    async fn accept(h: &mut Harness) -> ServerSide {
        h.acceptor.accept().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_on_open_and_forwards_frames() {
        let mut h = start(0);
        let mut server = accept(&mut h).await;
        wait_connected(&mut h).await;

        let sub: Value = serde_json::from_str(&server.recv_sent().await.unwrap()).unwrap();
        assert_eq!(sub, json!({"topic": "trending", "event": "sub", "chainId": "56", "compression": 0}));

        server.send_text("{\"x\":1}").await;
        assert!(matches!(h.frames.recv().await, Some(Frame::Text(t)) if t == "{\"x\":1}"));

        h.shutdown.cancel();
        h.task.await.unwrap();
        assert!(server.closed_by_client());
        assert!(!h.status.borrow().connected());
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_error_sets_error_but_keeps_connection() {
        let mut h = start(0);
        let server = accept(&mut h).await;
        wait_connected(&mut h).await;

        server.error("WebSocket error").await;
        h.status.wait_for(|s| s.error.is_some()).await.unwrap();
        assert!(h.status.borrow().connected());
        assert!(!server.closed_by_client());
        assert_eq!(h.transport.opens(), 1);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_triggers_backoff_then_reconnects() {
        let mut h = start(0);
        let server = accept(&mut h).await;
        wait_connected(&mut h).await;

        let closed_at = tokio::time::Instant::now();
        server.close(Some("bye".into())).await;
        h.status
            .wait_for(|s| matches!(s.state, ConnectionState::Disconnected(_)))
            .await
            .unwrap();

        let _second = accept(&mut h).await;
        assert!(closed_at.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(h.transport.opens(), 2);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_back_off_exponentially() {
        let mut h = start(3);
        let started = tokio::time::Instant::now();

        let _server = accept(&mut h).await;
        wait_connected(&mut h).await;

        // 1.5s + 3s + 6s between the four attempts
        assert!(started.elapsed() >= Duration::from_millis(10_500));
        assert!(started.elapsed() < Duration::from_millis(11_000));
        assert_eq!(h.transport.opens(), 4);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_cancels_pending_backoff() {
        let mut h = start(0);
        let first = accept(&mut h).await;
        wait_connected(&mut h).await;

        first.close(None).await;
        h.status.wait_for(|s| !s.connected()).await.unwrap();

        h.commands.send(Command::Reconnect).await.unwrap();
        let _second = accept(&mut h).await;
        assert_eq!(h.transport.opens(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 2);
        assert!(h.acceptor.try_accept().is_none());

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_closes_current_connection() {
        let mut h = start(0);
        let first = accept(&mut h).await;
        wait_connected(&mut h).await;

        h.commands.send(Command::Reconnect).await.unwrap();
        let second = accept(&mut h).await;
        assert!(first.closed_by_client());
        assert!(!second.closed_by_client());

        // the superseded connection can no longer schedule anything
        assert!(!first.close(None).await);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 2);

        h.shutdown.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_cancels_the_timer() {
        let mut h = start(1);
        h.status
            .wait_for(|s| s.error.is_some())
            .await
            .unwrap();

        h.shutdown.cancel();
        h.task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
    }
}
