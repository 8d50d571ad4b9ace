// hasher.rs — SHA-256 hashing and attribute canonicalization.
//
// All hashes in Provenant are SHA-256, lowercase hex. A record hash covers the
// sequence, activity tag, activity name, timestamp, canonical attributes and
// the previous record hash. Each field is length-prefixed so that no two
// distinct field tuples can produce the same byte stream.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::record::{ActivityType, Attributes};

/// `previous_hash` of the first record in every session.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Recursively rebuild a JSON value with object keys in sorted order.
///
/// Does not rely on serde_json's map ordering feature flags, so the encoding
/// is stable even if a downstream crate enables `preserve_order`.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact, key-sorted JSON encoding of an attribute map.
pub fn canonical_attributes(attributes: &Attributes) -> Result<String, serde_json::Error> {
    let mut out = String::from("{");
    for (i, (key, value)) in attributes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key)?);
        out.push(':');
        out.push_str(&serde_json::to_string(&canonicalize(value))?);
    }
    out.push('}');
    Ok(out)
}

/// Hash of the canonical attributes alone (entity identity).
pub fn content_hash(attributes: &Attributes) -> Result<String, serde_json::Error> {
    Ok(hash_str(&canonical_attributes(attributes)?))
}

/// Fixed-precision timestamp encoding used inside the record hash.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Compute `record_hash` from its constituent fields.
pub fn record_hash(
    sequence: u64,
    activity_type: &ActivityType,
    activity_name: &str,
    timestamp: &DateTime<Utc>,
    attributes_canonical: &str,
    previous_hash: &str,
) -> String {
    let sequence = sequence.to_string();
    let timestamp = canonical_timestamp(timestamp);
    let fields: [&[u8]; 6] = [
        sequence.as_bytes(),
        activity_type.as_str().as_bytes(),
        activity_name.as_bytes(),
        timestamp.as_bytes(),
        attributes_canonical.as_bytes(),
        previous_hash.as_bytes(),
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    format!("{:x}", hasher.finalize())
}
