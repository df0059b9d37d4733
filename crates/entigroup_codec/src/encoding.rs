//! String encoding of keys and byte encoding of serialized values.
//!
//! Keys are written as a root-first list of `(kind, identity)` segments in
//! CBOR, then rendered as URL-safe base64 without padding so they can be
//! embedded in URLs and application fields unchanged.

use crate::error::{CodecError, CodecResult};
use crate::key::{KeyIdentity, StoreKey};
use crate::value::PropertyValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Serialize, Deserialize)]
struct SegmentWire {
    kind: String,
    identity: KeyIdentity,
}

/// Encodes a key to its string form.
pub fn encode_key(key: &StoreKey) -> CodecResult<String> {
    let segments: Vec<SegmentWire> = key
        .path()
        .into_iter()
        .map(|k| SegmentWire {
            kind: k.kind().to_string(),
            identity: k.identity().clone(),
        })
        .collect();

    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&segments, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decodes a key from its string form.
///
/// Any failure, including a structurally valid payload that names an
/// invalid identity, is reported as [`CodecError::MalformedKey`].
pub fn decode_key(encoded: &str) -> CodecResult<StoreKey> {
    if encoded.is_empty() {
        return Err(CodecError::malformed_key("empty key string"));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CodecError::malformed_key(format!("not base64: {e}")))?;
    let mut reader = Cursor::new(bytes.as_slice());
    let segments: Vec<SegmentWire> = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::malformed_key(format!("bad key payload: {e}")))?;
    if reader.position() != bytes.len() as u64 {
        return Err(CodecError::malformed_key("trailing bytes after key payload"));
    }

    if segments.is_empty() {
        return Err(CodecError::malformed_key("key has no segments"));
    }

    let mut key: Option<StoreKey> = None;
    for segment in segments {
        key = Some(
            StoreKey::new(segment.kind, key, segment.identity)
                .map_err(|e| CodecError::malformed_key(e.to_string()))?,
        );
    }
    key.ok_or_else(|| CodecError::malformed_key("key has no segments"))
}

/// Encodes a value into the byte form used for serialized fields.
pub fn encode_serialized(value: &PropertyValue) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value previously written by [`encode_serialized`].
pub fn decode_serialized(bytes: &[u8]) -> CodecResult<PropertyValue> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
