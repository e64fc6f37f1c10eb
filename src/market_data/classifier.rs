use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::state::token::TokenRecord;

/// What a decoded message asks the engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Server liveness check; carries the timestamp to echo back.
    Heartbeat { timestamp: String },
    /// Full replacement of the token set.
    Snapshot(Vec<TokenRecord>),
    /// Partial records to merge into the current set.
    Incremental(Vec<TokenRecord>),
    Unrecognized,
}

impl Classified {
    pub fn kind(&self) -> &'static str {
        match self {
            Classified::Heartbeat { .. } => "heartbeat",
            Classified::Snapshot(_) => "snapshot",
            Classified::Incremental(_) => "incremental",
            Classified::Unrecognized => "unrecognized",
        }
    }
}

/// Rules are checked in order: heartbeat, snapshot, incremental.
/// Never fails; anything that matches no rule is `Unrecognized`.
pub fn classify(msg: Value) -> Classified {
    if is_ping(&msg) {
        let timestamp = msg
            .get("ping")
            .filter(|v| !v.is_null())
            .or_else(|| msg.get("t").filter(|v| !v.is_null()))
            .map(timestamp_string)
            .unwrap_or_else(|| now_ms().to_string());
        return Classified::Heartbeat { timestamp };
    }

    let Value::Object(mut obj) = msg else {
        return Classified::Unrecognized;
    };

    let is_snapshot = obj.get("msg").and_then(Value::as_str) == Some("success");
    let is_trending = obj.get("topic").and_then(Value::as_str) == Some("trending");
    if !is_snapshot && !is_trending {
        return Classified::Unrecognized;
    }

    let Some(Value::Array(items)) = obj.remove("data") else {
        return Classified::Unrecognized;
    };
    let records = into_records(items);

    if is_snapshot {
        Classified::Snapshot(records)
    } else {
        Classified::Incremental(records)
    }
}

fn is_ping(msg: &Value) -> bool {
    if msg.get("topic").and_then(Value::as_str) == Some("ping") {
        return true;
    }
    msg.get("ping").is_some_and(is_truthy)
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Renders a timestamp the way it appeared on the wire: strings verbatim,
/// integral numbers without a fractional part.
fn timestamp_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
                    _ => n.to_string(),
                }
            }
        }
        other => other.to_string(),
    }
}

fn into_records(items: Vec<Value>) -> Vec<TokenRecord> {
    let total = items.len();
    let records: Vec<TokenRecord> = items.into_iter().filter_map(TokenRecord::from_value).collect();
    if records.len() != total {
        debug!(skipped = total - records.len(), "non-object entries in data array");
    }
    records
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_with_timestamp() {
        let c = classify(json!({"topic": "ping", "ping": 1690000000000u64}));
        assert_eq!(c, Classified::Heartbeat { timestamp: "1690000000000".into() });
    }

    #[test]
    fn ping_field_alone_is_a_heartbeat() {
        let c = classify(json!({"ping": "abc"}));
        assert_eq!(c, Classified::Heartbeat { timestamp: "abc".into() });
    }

    #[test]
    fn ping_topic_falls_back_to_t_then_now() {
        let c = classify(json!({"topic": "ping", "t": 42}));
        assert_eq!(c, Classified::Heartbeat { timestamp: "42".into() });

        let Classified::Heartbeat { timestamp } = classify(json!({"topic": "ping"})) else {
            panic!("expected heartbeat");
        };
        assert!(timestamp.parse::<u64>().unwrap() > 1_600_000_000_000);
    }

    #[test]
    fn float_timestamps_render_as_integers() {
        let c = classify(json!({"ping": 1690000000000.0}));
        assert_eq!(c, Classified::Heartbeat { timestamp: "1690000000000".into() });
    }

    #[test]
    fn falsy_ping_field_is_not_a_heartbeat() {
        assert_eq!(classify(json!({"ping": 0})), Classified::Unrecognized);
        assert_eq!(classify(json!({"ping": null})), Classified::Unrecognized);
    }

    #[test]
    fn success_with_array_is_snapshot() {
        let c = classify(json!({"msg": "success", "data": [{"pair": "a"}, {"pair": "b"}]}));
        let Classified::Snapshot(records) = c else { panic!("expected snapshot") };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pair(), Some("a"));
    }

    #[test]
    fn trending_topic_with_array_is_incremental() {
        let c = classify(json!({"topic": "trending", "data": [{"pair": "a", "priceUsd": 1}]}));
        assert_eq!(c.kind(), "incremental");
    }

    #[test]
    fn snapshot_rule_wins_over_incremental() {
        let c = classify(json!({"msg": "success", "topic": "trending", "data": []}));
        assert_eq!(c, Classified::Snapshot(vec![]));
    }

    #[test]
    fn non_object_items_are_skipped() {
        let c = classify(json!({"topic": "trending", "data": [1, {"pair": "a"}, "x"]}));
        let Classified::Incremental(records) = c else { panic!("expected incremental") };
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn shapes_that_match_nothing_are_unrecognized() {
        for msg in [
            json!({"msg": "success", "data": {"pair": "a"}}),
            json!({"topic": "trending"}),
            json!({"topic": "kline", "data": []}),
            json!({"msg": "error", "data": []}),
            json!([1, 2, 3]),
            json!("hello"),
        ] {
            assert_eq!(classify(msg), Classified::Unrecognized);
        }
    }
}
