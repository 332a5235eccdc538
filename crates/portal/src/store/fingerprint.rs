//! Input fingerprints for the result cache.
//!
//! A fingerprint is the SHA-256 of the stage key and a canonical rendering of
//! the input: object keys sorted, strings trimmed, lowercased and
//! whitespace-collapsed. Array order is significant.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{text::collapse_whitespace_lower, Result};

pub fn fingerprint<I: Serialize + ?Sized>(stage_key: &str, input: &I) -> Result<String> {
    let value = serde_json::to_value(input)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(stage_key.as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => out.push_str(&value.to_string()),
        Value::String(s) => out.push_str(&Value::String(collapse_whitespace_lower(s)).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}
