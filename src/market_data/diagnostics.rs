use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::market_data::error::FeedError;

const DIAGNOSTIC_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Decode,
    ClassifyMiss,
    TransportOpen,
    TransportRuntime,
}

/// A non-fatal event worth surfacing to whoever is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDiagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl From<&FeedError> for FeedDiagnostic {
    fn from(err: &FeedError) -> Self {
        let kind = match err {
            FeedError::Decode(_) => DiagnosticKind::Decode,
            FeedError::ClassifyMiss => DiagnosticKind::ClassifyMiss,
            FeedError::TransportOpen(_) => DiagnosticKind::TransportOpen,
            FeedError::TransportRuntime(_) => DiagnosticKind::TransportRuntime,
        };
        Self {
            kind,
            detail: err.to_string(),
        }
    }
}

/// Log-and-broadcast channel for swallowed errors. Publishing never fails,
/// with or without subscribers; slow subscribers lag rather than block.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tx: broadcast::Sender<FeedDiagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DIAGNOSTIC_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedDiagnostic> {
        self.tx.subscribe()
    }

    pub fn report(&self, err: &FeedError) {
        if err.is_connection_level() {
            warn!(error = %err, "connection error");
        } else {
            debug!(error = %err, "frame dropped");
        }
        let _ = self.tx.send(FeedDiagnostic::from(err));
    }
}
