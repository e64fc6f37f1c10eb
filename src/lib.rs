//! Live trending-token feed.
//!
//! Keeps one streaming connection to the trending endpoint, decodes whatever
//! frame shape the server sends, and folds snapshots and incremental updates
//! into a [`TokenStore`] that consumers read from. Connection trouble shows up
//! on the status signal and heals through exponential backoff; bad frames are
//! dropped and reported on the diagnostics channel.

pub mod config;
pub mod engine;
pub mod market_data;
pub mod metrics;
pub mod state;

pub use config::{Config, FeedConfig};
pub use engine::{EngineHandle, FeedEngine};
pub use market_data::adapters::{ChannelTransport, Transport, WsTransport};
pub use market_data::types::{ConnectionState, ConnectionStatus, Frame};
pub use state::{TokenIdentity, TokenRecord, TokenStore};
