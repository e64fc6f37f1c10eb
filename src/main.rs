use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use trending_feed::{Config, FeedEngine, WsTransport};

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    if let Some(addr) = config.metrics_addr {
        trending_feed::metrics::init_metrics_server(addr)?;
        info!(%addr, "metrics exporter listening");
    }

    info!(
        endpoint = %config.feed.endpoint,
        mock = config.feed.mock,
        "trending-feed starting"
    );

    let transport = Arc::new(WsTransport::new(config.feed.frame_buffer));
    let engine = FeedEngine::start(config.feed, transport);

    let mut status = engine.watch_status();
    let mut revision = engine.watch_revision();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("status channel closed");
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    connected = current.connected(),
                    state = ?current.state,
                    error = ?current.error,
                    "connection status"
                );
            }
            changed = revision.changed() => {
                if changed.is_err() {
                    break;
                }
                let rev = *revision.borrow_and_update();
                debug!(revision = rev, tokens = engine.store().len(), "token set updated");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                break;
            }
        }
    }

    engine.stop().await;
    Ok(())
}
