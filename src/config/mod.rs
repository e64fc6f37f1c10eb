use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::market_data::reconnect::BackoffPolicy;
use crate::state::token::TokenRecord;

pub const DEFAULT_ENDPOINT: &str = "wss://web-t.pinkpunk.io/ws";
pub const DEFAULT_CHAIN_ID: &str = "56";

/// Adapter→router channel buffer.
/// Sized to absorb WebSocket bursts without back-pressuring the adapter.
pub const DEFAULT_FRAME_BUFFER: usize = 4_096;

/// Everything the engine needs; no process-wide state beyond this.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub endpoint: String,
    pub chain_id: String,
    /// Offline mode: never open a transport, publish `seed` instead.
    pub mock: bool,
    pub backoff: BackoffPolicy,
    pub frame_buffer: usize,
    pub connect_timeout: Duration,
    pub seed: Vec<TokenRecord>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            mock: false,
            backoff: BackoffPolicy::default(),
            frame_buffer: DEFAULT_FRAME_BUFFER,
            connect_timeout: Duration::from_secs(10),
            seed: default_seed(),
        }
    }
}

pub fn default_seed() -> Vec<TokenRecord> {
    vec![
        TokenRecord::new()
            .with("pair", "btc")
            .with("baseSymbol", "BTC")
            .with("priceUsd", 60000),
        TokenRecord::new()
            .with("pair", "eth")
            .with("baseSymbol", "ETH")
            .with("priceUsd", 3500),
    ]
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub metrics_addr: Option<SocketAddr>,
    pub feed: FeedConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // dotenvy loads .env, but doesn't override already-set env vars
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let defaults = FeedConfig::default();

        let backoff = BackoffPolicy {
            base: parse::<u64>(&lookup, "FEED_BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.base),
            cap: parse::<u64>(&lookup, "FEED_BACKOFF_CAP_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff.cap),
        };
        anyhow::ensure!(
            backoff.base <= backoff.cap,
            "FEED_BACKOFF_BASE_MS must not exceed FEED_BACKOFF_CAP_MS"
        );

        let frame_buffer = parse::<usize>(&lookup, "FEED_FRAME_BUFFER")?.unwrap_or(defaults.frame_buffer);
        anyhow::ensure!(frame_buffer > 0, "FEED_FRAME_BUFFER must be positive");

        let seed = match lookup("FEED_SEED_PATH") {
            Some(path) => load_seed(Path::new(&path))?,
            None => defaults.seed,
        };

        let feed = FeedConfig {
            endpoint: lookup("FEED_ENDPOINT").unwrap_or(defaults.endpoint),
            chain_id: lookup("FEED_CHAIN_ID").unwrap_or(defaults.chain_id),
            mock: parse_flag(&lookup, "FEED_MOCK")?.unwrap_or(defaults.mock),
            backoff,
            frame_buffer,
            connect_timeout: parse::<u64>(&lookup, "FEED_CONNECT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            seed,
        };

        Ok(Self {
            log_level,
            metrics_addr: parse::<SocketAddr>(&lookup, "FEED_METRICS_ADDR")?,
            feed,
        })
    }
}

/// Reads a JSON array of token objects.
pub fn load_seed(path: &Path) -> anyhow::Result<Vec<TokenRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<bool>> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(None),
        Some("1" | "true" | "TRUE" | "yes") => Ok(Some(true)),
        Some("0" | "false" | "FALSE" | "no" | "") => Ok(Some(false)),
        Some(other) => anyhow::bail!("invalid {key}={other:?}: expected true/false"),
    }
}
