//! Error taxonomy for the feed.
//!
//! Per-frame failures (`Decode`, `ClassifyMiss`) are swallowed by the
//! processing loop and only surface as logs, metrics and diagnostics.
//! Connection-level failures reach the status signal and drive backoff.

/// A frame none of the candidate interpretations could turn into JSON.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("inflate failed: {0}")]
    Inflate(#[source] std::io::Error),

    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("deferred payload could not be materialized: {0}")]
    Materialize(String),

    #[error("empty frame")]
    Empty,

    #[error("inflated payload exceeds {0} bytes")]
    TooLarge(usize),
}

/// Failures at the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("frame dropped: {0}")]
    Decode(#[from] DecodeError),

    #[error("unrecognized message shape")]
    ClassifyMiss,

    #[error("failed to open transport: {0}")]
    TransportOpen(#[source] TransportError),

    #[error("transport error: {0}")]
    TransportRuntime(String),
}

impl FeedError {
    /// Connection-level errors are user-visible and trigger reconnects;
    /// per-frame errors are not.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, FeedError::TransportOpen(_) | FeedError::TransportRuntime(_))
    }
}
