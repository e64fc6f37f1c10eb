use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus HTTP exporter on `addr`.
/// After this call, any metrics recorded via the `metrics` crate
/// macros (counter!, gauge!) are automatically exported at /metrics.
pub fn init_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to start Prometheus metrics server: {e}"))
}

// ── Frame metrics ────────────────────────────────────────────────

pub fn record_frame(encoding: &'static str) {
    counter!("feed_frames_total", "encoding" => encoding).increment(1);
}

pub fn record_decode_failure(encoding: &'static str) {
    counter!("feed_decode_failures_total", "encoding" => encoding).increment(1);
}

pub fn record_message(kind: &'static str) {
    counter!("feed_messages_total", "kind" => kind).increment(1);
}

pub fn record_classify_miss() {
    counter!("feed_classify_misses_total").increment(1);
}

pub fn record_pong_sent() {
    counter!("feed_pongs_sent_total").increment(1);
}

// ── Store metrics ────────────────────────────────────────────────

pub fn record_token_count(count: usize) {
    gauge!("feed_tokens").set(count as f64);
}

pub fn record_fallback_identity() {
    counter!("feed_fallback_identities_total").increment(1);
}

// ── Connection metrics ───────────────────────────────────────────

pub fn record_connection_open() {
    counter!("feed_connection_opens_total").increment(1);
}

pub fn record_connection_error(stage: &'static str) {
    counter!("feed_connection_errors_total", "stage" => stage).increment(1);
}

pub fn record_reconnect_scheduled(delay_ms: u64) {
    counter!("feed_reconnects_scheduled_total").increment(1);
    gauge!("feed_reconnect_delay_ms").set(delay_ms as f64);
}
