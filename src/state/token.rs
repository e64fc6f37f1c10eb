use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Fields consulted, in order, to derive a record's identity.
const IDENTITY_FIELDS: [(&str, IdentitySource); 3] = [
    ("pair", IdentitySource::Pair),
    ("baseToken", IdentitySource::BaseToken),
    ("baseSymbol", IdentitySource::BaseSymbol),
];

/// One trending token/pair as delivered by the server.
///
/// The record is an open attribute bag: the server may send any subset of the
/// known fields plus fields this crate has never heard of, and all of them are
/// kept verbatim. Typed accessors only read; nothing is rewritten on the way in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenRecord {
    fields: Map<String, Value>,
}

impl TokenRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value as a record. Anything other than an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Shallow field-by-field overlay: every field of `partial` replaces the
    /// field of the same name here, everything else is left alone.
    pub fn overlay(&mut self, partial: &TokenRecord) {
        for (key, value) in &partial.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Derives the store key from `pair`, then `baseToken`, then `baseSymbol`.
    /// Returns `None` when none of them is present (or all are null).
    pub fn stable_identity(&self) -> Option<(TokenIdentity, IdentitySource)> {
        IDENTITY_FIELDS.iter().find_map(|(field, source)| {
            let value = self.fields.get(*field)?;
            let key = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((TokenIdentity(key), *source))
        })
    }

    /// Same as [`stable_identity`](Self::stable_identity) but never fails: a
    /// record without any identifying field gets a random, process-local key.
    /// Such keys are not stable across messages.
    pub fn identity(&self) -> (TokenIdentity, IdentitySource) {
        self.stable_identity()
            .unwrap_or_else(|| (TokenIdentity::random(), IdentitySource::Fallback))
    }

    pub fn pair(&self) -> Option<&str> {
        self.str_field("pair")
    }

    pub fn base_token(&self) -> Option<&str> {
        self.str_field("baseToken")
    }

    pub fn base_symbol(&self) -> Option<&str> {
        self.str_field("baseSymbol")
    }

    pub fn base_name(&self) -> Option<&str> {
        self.str_field("baseName")
    }

    pub fn base_decimals(&self) -> Option<u64> {
        self.fields.get("baseDecimals").and_then(Value::as_u64)
    }

    pub fn dex(&self) -> Option<&str> {
        self.str_field("dex")
    }

    pub fn chain_id(&self) -> Option<&str> {
        self.str_field("chainId")
    }

    pub fn quote_token(&self) -> Option<&str> {
        self.str_field("quoteToken")
    }

    pub fn price_usd(&self) -> Option<f64> {
        self.num_field("priceUsd")
    }

    pub fn price(&self) -> Option<f64> {
        self.num_field("price")
    }

    pub fn price_change_1h(&self) -> Option<f64> {
        self.num_field("priceChange1h")
    }

    pub fn price_change_24h(&self) -> Option<f64> {
        self.num_field("priceChange24h")
    }

    pub fn volume_usd_24h(&self) -> Option<f64> {
        self.num_field("volumeUsd24h")
    }

    pub fn liquidity(&self) -> Option<f64> {
        self.num_field("liquidity")
    }

    pub fn market_cap(&self) -> Option<f64> {
        self.num_field("marketCap")
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    fn num_field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }
}

/// Store key derived from a record; see [`TokenRecord::identity`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenIdentity(pub String);

impl TokenIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn random() -> Self {
        let n: u64 = rand::thread_rng().r#gen();
        Self(format!("~{n:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which field produced an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    Pair,
    BaseToken,
    BaseSymbol,
    Fallback,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Pair => "pair",
            IdentitySource::BaseToken => "baseToken",
            IdentitySource::BaseSymbol => "baseSymbol",
            IdentitySource::Fallback => "fallback",
        }
    }
}
