//! Frame decoding.
//!
//! The server is inconsistent about how it ships a message, so each frame is
//! tried against a short list of interpretations and the first one that
//! yields JSON wins:
//!
//! 1. text whose first non-blank character is `{` is parsed as-is;
//! 2. any other text is read as one byte per character, inflated, parsed;
//! 3. binary is inflated and parsed (and, failing that, parsed as plain UTF-8);
//! 4. a deferred payload is awaited and then goes through 1–2.
//!
//! A failed candidate falls through to the next. Only when all of them fail
//! does the caller get a [`DecodeError`], which is never fatal to the stream.

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use futures::future::BoxFuture;
use serde_json::Value;
use std::io::Read;

use crate::market_data::error::DecodeError;
use crate::market_data::types::Frame;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Largest inflated payload accepted from a single frame.
pub const MAX_INFLATED: usize = 16 * 1024 * 1024;

/// Decodes any frame shape. Deferred frames are awaited here, so callers that
/// must not stall (the processing loop) should route them through
/// [`decode_deferred`] on a task of their own.
pub async fn decode(frame: Frame) -> Result<Value, DecodeError> {
    match frame {
        Frame::Text(text) => decode_text(&text),
        Frame::Binary(bytes) => decode_binary(&bytes),
        Frame::Deferred(fut) => decode_deferred(fut).await,
    }
}

pub fn decode_text(raw: &str) -> Result<Value, DecodeError> {
    if looks_like_json(raw) {
        match serde_json::from_str(raw) {
            Ok(v) => return Ok(v),
            Err(e) => tracing::trace!(error = %e, "plain text candidate rejected"),
        }
    }

    let bytes = reconstruct_bytes(raw);
    parse_bytes(&inflate(&bytes)?)
}

pub fn decode_binary(bytes: &[u8]) -> Result<Value, DecodeError> {
    let inflated = inflate(bytes).and_then(|out| parse_bytes(&out));
    match inflated {
        Ok(v) => Ok(v),
        Err(inflate_err) => match std::str::from_utf8(bytes) {
            Ok(text) if looks_like_json(text) => {
                serde_json::from_str(text).map_err(|_| inflate_err)
            }
            _ => Err(inflate_err),
        },
    }
}

pub async fn decode_deferred(
    fut: BoxFuture<'static, Result<String, DecodeError>>,
) -> Result<Value, DecodeError> {
    let text = fut.await?;
    decode_text(&text)
}

/// Undoes a byte-per-character string: keeps the low byte of every UTF-16
/// code unit, so a character outside the BMP yields two bytes (one per
/// surrogate). Real payloads only carry chars up to U+00FF.
pub fn reconstruct_bytes(raw: &str) -> Vec<u8> {
    raw.encode_utf16().map(|unit| (unit & 0xff) as u8).collect()
}

/// Inflates gzip- or zlib-framed data, falling back to raw DEFLATE. Output
/// beyond [`MAX_INFLATED`] bytes is refused.
pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut out = Vec::with_capacity(bytes.len() * 4);
    let framed = if bytes.starts_with(&GZIP_MAGIC) {
        read_capped(GzDecoder::new(bytes), &mut out)
    } else {
        read_capped(ZlibDecoder::new(bytes), &mut out)
    };

    match framed {
        Ok(()) => within_limit(out),
        Err(framed_err) => {
            out.clear();
            match read_capped(DeflateDecoder::new(bytes), &mut out) {
                Ok(()) => within_limit(out),
                Err(_) => Err(DecodeError::Inflate(framed_err)),
            }
        }
    }
}

// Reads at most one byte past the limit so an oversized payload is detectable.
fn read_capped<R: Read>(reader: R, out: &mut Vec<u8>) -> std::io::Result<()> {
    reader.take(MAX_INFLATED as u64 + 1).read_to_end(out).map(|_| ())
}

fn within_limit(out: Vec<u8>) -> Result<Vec<u8>, DecodeError> {
    if out.len() > MAX_INFLATED {
        return Err(DecodeError::TooLarge(MAX_INFLATED));
    }
    Ok(out)
}

fn parse_bytes(bytes: &[u8]) -> Result<Value, DecodeError> {
    let text = String::from_utf8(bytes.to_vec())?;
    Ok(serde_json::from_str(&text)?)
}

fn looks_like_json(text: &str) -> bool {
    text.trim_start().starts_with('{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use serde_json::json;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn byte_string(bytes: &[u8]) -> String {
        bytes.iter().map(|&b| b as char).collect()
    }

    fn sample() -> Value {
        json!({
            "topic": "trending",
            "data": [{"pair": "0xabc", "baseName": "Pancake ünï", "priceUsd": 2.31}]
        })
    }

    #[tokio::test]
    async fn every_frame_shape_yields_the_same_message() {
        let expected = sample();
        let text = expected.to_string();
        let compressed = zlib(text.as_bytes());

        let plain = decode(Frame::Text(text.clone())).await.unwrap();
        let reconstructed = decode(Frame::Text(byte_string(&compressed))).await.unwrap();
        let binary = decode(Frame::Binary(compressed.clone())).await.unwrap();
        let deferred_text = byte_string(&compressed);
        let deferred = decode(Frame::deferred(async move { Ok(deferred_text) }))
            .await
            .unwrap();

        assert_eq!(plain, expected);
        assert_eq!(reconstructed, expected);
        assert_eq!(binary, expected);
        assert_eq!(deferred, expected);
    }

    #[test]
    fn gzip_and_raw_deflate_are_accepted() {
        let text = sample().to_string();
        assert_eq!(decode_binary(&gzip(text.as_bytes())).unwrap(), sample());
        assert_eq!(decode_binary(&raw_deflate(text.as_bytes())).unwrap(), sample());
    }

    #[test]
    fn leading_whitespace_before_brace_is_plain_json() {
        assert_eq!(decode_text("  \n{\"a\":1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn broken_plain_json_falls_through_and_fails() {
        let err = decode_text("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Inflate(_) | DecodeError::Json(_) | DecodeError::Utf8(_)));
    }

    #[test]
    fn uncompressed_binary_json_is_accepted() {
        let v = decode_binary(br#"{"msg":"success","data":[]}"#).unwrap();
        assert_eq!(v, json!({"msg": "success", "data": []}));
    }

    #[test]
    fn empty_frames_fail() {
        assert!(matches!(decode_binary(&[]), Err(DecodeError::Empty)));
        assert!(matches!(decode_text(""), Err(DecodeError::Empty)));
    }

    #[tokio::test]
    async fn deferred_materialization_errors_propagate() {
        let err = decode(Frame::deferred(async {
            Err(DecodeError::Materialize("reader aborted".into()))
        }))
        .await
        .unwrap_err();
        assert!(matches!(err, DecodeError::Materialize(_)));
    }

    #[tokio::test]
    async fn deferred_plain_json_skips_inflate() {
        let v = decode(Frame::deferred(async { Ok(r#"{"ping":1}"#.to_string()) }))
            .await
            .unwrap();
        assert_eq!(v, json!({"ping": 1}));
    }

    #[test]
    fn oversized_inflate_is_refused() {
        let bomb = zlib(&vec![b' '; MAX_INFLATED + 1024]);
        assert!(bomb.len() < 64 * 1024);

        assert!(matches!(inflate(&bomb), Err(DecodeError::TooLarge(MAX_INFLATED))));
        assert!(matches!(decode_binary(&bomb), Err(DecodeError::TooLarge(_))));
        assert!(matches!(decode_text(&byte_string(&bomb)), Err(DecodeError::TooLarge(_))));
    }

    #[test]
    fn payload_at_the_limit_still_inflates() {
        let data = vec![b'a'; MAX_INFLATED];
        assert_eq!(inflate(&zlib(&data)).unwrap().len(), MAX_INFLATED);
    }

    #[test]
    fn reconstruction_works_per_utf16_unit() {
        assert_eq!(reconstruct_bytes("\u{1f}\u{8b}\u{ff}"), vec![0x1f, 0x8b, 0xff]);
        // U+1F600 is the surrogate pair D83D DE00
        assert_eq!(reconstruct_bytes("\u{1f600}"), vec![0x3d, 0x00]);
    }
}
