use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::market_data::classifier::{Classified, classify};
use crate::market_data::decoder;
use crate::market_data::diagnostics::Diagnostics;
use crate::market_data::error::{DecodeError, FeedError};
use crate::market_data::heartbeat::HeartbeatResponder;
use crate::market_data::types::Frame;
use crate::state::token_store::TokenStore;

/// Decode → classify → dispatch, for one frame at a time.
#[derive(Clone, Debug)]
pub struct Pipeline {
    store: TokenStore,
    heartbeat: HeartbeatResponder,
    diagnostics: Diagnostics,
}

impl Pipeline {
    pub fn new(store: TokenStore, heartbeat: HeartbeatResponder, diagnostics: Diagnostics) -> Self {
        Self {
            store,
            heartbeat,
            diagnostics,
        }
    }

    /// Handles a frame that can be decoded synchronously.
    pub fn handle_now(&self, frame: &Frame) -> Result<Classified, FeedError> {
        let encoding = frame.encoding();
        crate::metrics::record_frame(encoding);
        let decoded = match frame {
            Frame::Text(text) => decoder::decode_text(text),
            Frame::Binary(bytes) => decoder::decode_binary(bytes),
            Frame::Deferred(_) => Err(DecodeError::Materialize(
                "deferred frame routed to synchronous path".to_string(),
            )),
        };
        self.handle_decoded(encoding, decoded)
    }

    pub fn handle_decoded(
        &self,
        encoding: &'static str,
        decoded: Result<Value, DecodeError>,
    ) -> Result<Classified, FeedError> {
        let result = match decoded {
            Ok(msg) => self.dispatch(classify(msg)),
            Err(e) => {
                crate::metrics::record_decode_failure(encoding);
                Err(FeedError::Decode(e))
            }
        };
        if let Err(e) = &result {
            self.diagnostics.report(e);
        }
        result
    }

    fn dispatch(&self, msg: Classified) -> Result<Classified, FeedError> {
        crate::metrics::record_message(msg.kind());
        match &msg {
            Classified::Heartbeat { timestamp } => {
                self.heartbeat.respond(timestamp);
            }
            Classified::Snapshot(records) => {
                let count = self.store.replace_all(records.iter().cloned());
                info!(records = records.len(), tokens = count, "snapshot applied");
            }
            Classified::Incremental(records) => {
                let count = self.store.merge_all(records.iter().cloned());
                debug!(records = records.len(), tokens = count, "update merged");
            }
            Classified::Unrecognized => {
                crate::metrics::record_classify_miss();
                return Err(FeedError::ClassifyMiss);
            }
        }
        Ok(msg)
    }
}

/// Processing loop: drains the frame channel until it closes or `shutdown`
/// fires. Deferred frames are materialized on their own tasks so a slow
/// payload never holds up the frames behind it; those tasks are aborted when
/// the loop exits.
pub async fn run_router(
    mut rx: mpsc::Receiver<Frame>,
    pipeline: Pipeline,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut deferred = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    debug!("frame channel closed");
                    break;
                };
                match frame {
                    Frame::Deferred(fut) => {
                        crate::metrics::record_frame("deferred");
                        let pipeline = pipeline.clone();
                        deferred.spawn(async move {
                            let decoded = decoder::decode_deferred(fut).await;
                            let _ = pipeline.handle_decoded("deferred", decoded);
                        });
                    }
                    frame => {
                        let _ = pipeline.handle_now(&frame);
                    }
                }
            }
            Some(_) = deferred.join_next(), if !deferred.is_empty() => {}
        }
    }

    deferred.shutdown().await;
    info!("router stopped");
    Ok(())
}
