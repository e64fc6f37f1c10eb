pub mod adapters;
pub mod classifier;
pub mod connection;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod heartbeat;
pub mod reconnect;
pub mod router;
pub mod types;
