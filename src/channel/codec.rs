// src/channel/codec.rs

//! Blob encoding for variable mappings.
//!
//! Layout: `MAGIC` (4 bytes) | blake3 digest of the payload (32 bytes) |
//! JSON payload (`{"name": {"kind": ..., "value": ...}, ...}`).
//!
//! Entries are encoded and decoded one at a time so a single bad value is
//! dropped instead of failing the whole mapping.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::channel::value::PortableValue;
use crate::errors::TransportError;

/// Name -> value mapping exchanged with a worker.
pub type Variables = BTreeMap<String, PortableValue>;

pub const MAGIC: &[u8; 4] = b"TFV1";
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + DIGEST_LEN;

/// Encode a mapping into a blob.
///
/// Figures are stripped of their render cache first. Entries that fail to
/// serialize are logged and skipped.
pub fn encode(values: &Variables) -> Vec<u8> {
    let mut payload: BTreeMap<&str, serde_json::Value> = BTreeMap::new();

    for (name, value) in values {
        let mut value = value.clone();
        value.strip_render_cache();

        match serde_json::to_value(&value) {
            Ok(json) => {
                payload.insert(name.as_str(), json);
            }
            Err(err) => {
                let err = TransportError::Entry {
                    name: name.clone(),
                    reason: err.to_string(),
                };
                warn!(error = %err, "dropping value from encoded batch");
            }
        }
    }

    // A map of `serde_json::Value`s always serializes.
    let body = serde_json::to_vec(&payload).unwrap_or_default();
    let digest = blake3::hash(&body);

    let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(digest.as_bytes());
    blob.extend_from_slice(&body);

    debug!(entries = payload.len(), bytes = blob.len(), "encoded variables");
    blob
}

/// Decode a blob produced by [`encode`].
///
/// A damaged header or checksum fails the whole blob; an individual entry
/// that cannot be decoded is logged and omitted.
pub fn decode(blob: &[u8]) -> Result<Variables, TransportError> {
    if blob.len() < HEADER_LEN {
        return Err(TransportError::Corrupt(format!(
            "blob is {} bytes, shorter than the {HEADER_LEN}-byte header",
            blob.len()
        )));
    }
    let (magic, rest) = blob.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(TransportError::Corrupt("bad magic".to_string()));
    }
    let (digest, body) = rest.split_at(DIGEST_LEN);
    if blake3::hash(body).as_bytes() != digest {
        return Err(TransportError::Corrupt("checksum mismatch".to_string()));
    }

    let payload: BTreeMap<String, serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| TransportError::Corrupt(format!("payload is not a mapping: {e}")))?;

    let mut values = Variables::new();
    for (name, json) in payload {
        match serde_json::from_value::<PortableValue>(json) {
            Ok(PortableValue::Array(array)) if !array.is_consistent() => {
                let err = TransportError::Entry {
                    name,
                    reason: format!(
                        "shape {:?} does not match {} values",
                        array.shape,
                        array.data.len()
                    ),
                };
                warn!(error = %err, "dropping undecodable value");
            }
            Ok(value) => {
                values.insert(name, value);
            }
            Err(err) => {
                let err = TransportError::Entry {
                    name,
                    reason: err.to_string(),
                };
                warn!(error = %err, "dropping undecodable value");
            }
        }
    }

    Ok(values)
}
