//! Content addressing for agent versions
//!
//! The fingerprint is SHA-256 over a canonical JSON encoding of
//! [`VersionFields`]: object keys sorted at every depth, no insignificant
//! whitespace. It never depends on struct layout or map iteration order.

use sha2::{Digest, Sha256};

use super::VersionFields;

const PREFIX: &str = "sha256:";

/// Fingerprint the semantic fields of a version
pub fn fingerprint(fields: &VersionFields) -> String {
    let value = serde_json::to_value(fields).unwrap_or(serde_json::Value::Null);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}{}", PREFIX, hex::encode(digest))
}

/// Fingerprint arbitrary bytes (archives, files) in the same notation
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{}{}", PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Compare a digest against an expected value given with or without the prefix
pub fn digests_match(expected: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches(PREFIX).to_ascii_lowercase();
    strip(expected) == strip(actual)
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
