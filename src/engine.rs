use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::market_data::adapters::Transport;
use crate::market_data::connection::{Command, ConnectionManager, ConnectionSettings};
use crate::market_data::diagnostics::{Diagnostics, FeedDiagnostic};
use crate::market_data::heartbeat::HeartbeatResponder;
use crate::market_data::router::{Pipeline, run_router};
use crate::market_data::types::{ConnectionState, ConnectionStatus};
use crate::state::token::TokenRecord;
use crate::state::token_store::TokenStore;

const COMMAND_BUFFER: usize = 8;

/// Entry point: wires store, processing loop and connection supervisor for
/// one feed.
pub struct FeedEngine;

impl FeedEngine {
    /// Spawns the engine's tasks on the current tokio runtime.
    pub fn start(config: FeedConfig, transport: Arc<dyn Transport>) -> EngineHandle {
        let store = TokenStore::new();
        let diagnostics = Diagnostics::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let shutdown = CancellationToken::new();

        // Offline mode is fully published before `start` returns.
        let initial = if config.mock {
            store.replace_all(config.seed.iter().cloned());
            ConnectionStatus {
                state: ConnectionState::Connected,
                error: None,
            }
        } else {
            ConnectionStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let tasks = if config.mock {
            info!(seed = config.seed.len(), "offline mode, transport disabled");
            vec![tokio::spawn(run_offline(
                config.seed,
                store.clone(),
                status_tx,
                commands_rx,
                shutdown.clone(),
            ))]
        } else {
            let (frames_tx, frames_rx) = mpsc::channel(config.frame_buffer.max(1));
            let heartbeat = HeartbeatResponder::new();
            let pipeline = Pipeline::new(store.clone(), heartbeat.clone(), diagnostics.clone());

            let router_shutdown = shutdown.clone();
            let router = tokio::spawn(async move {
                if let Err(err) = run_router(frames_rx, pipeline, router_shutdown).await {
                    warn!(error = %err, "router task returned error");
                }
            });

            let manager = ConnectionManager::new(
                ConnectionSettings {
                    endpoint: config.endpoint,
                    chain_id: config.chain_id,
                    connect_timeout: config.connect_timeout,
                    backoff: config.backoff,
                },
                transport,
                frames_tx,
                heartbeat,
                status_tx,
                diagnostics.clone(),
            );
            let supervisor = tokio::spawn(manager.run(commands_rx, shutdown.clone()));

            vec![router, supervisor]
        };

        EngineHandle {
            store,
            status: status_rx,
            diagnostics,
            commands: commands_tx,
            shutdown,
            tasks,
        }
    }
}

/// Offline mode after the initial publish: re-seed on manual reconnect and
/// report disconnected on teardown.
async fn run_offline(
    seed: Vec<TokenRecord>,
    store: TokenStore,
    status: watch::Sender<ConnectionStatus>,
    mut commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) {
    let publish = |store: &TokenStore| {
        store.replace_all(seed.iter().cloned());
        status.send_replace(ConnectionStatus {
            state: ConnectionState::Connected,
            error: None,
        });
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = commands.recv() => match cmd {
                Some(Command::Reconnect) => publish(&store),
                None => break,
            },
        }
    }
    status.send_modify(|s| s.state = ConnectionState::Disconnected(None));
}

/// What consumers hold on to. Dropping it tears the engine down.
pub struct EngineHandle {
    store: TokenStore,
    status: watch::Receiver<ConnectionStatus>,
    diagnostics: Diagnostics,
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Current token records, unordered.
    pub fn tokens(&self) -> Vec<TokenRecord> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.store.watch_revision()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<FeedDiagnostic> {
        self.diagnostics.subscribe()
    }

    /// Close the current connection (if any) and connect again right away,
    /// skipping a pending backoff. Never blocks; a reconnect already queued
    /// absorbs this one.
    pub fn reconnect(&self) {
        match self.commands.try_send(Command::Reconnect) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("reconnect already pending"),
            Err(TrySendError::Closed(_)) => warn!("reconnect ignored, engine stopped"),
        }
    }

    /// Cancels the backoff timer, closes the transport and waits for the
    /// engine's tasks to finish. The store keeps its last contents.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(error = %err, "engine task panicked");
            }
        }
        info!("engine stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
