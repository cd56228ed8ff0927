//! Canonical JSON, row hashing and HMAC verification.
//!
//! Row hashes are SHA-256 over a canonical JSON rendering: object keys sorted
//! lexicographically at every depth, decimals in their canonical string form.
//! The key order is fixed here rather than relying on serializer defaults so
//! hashes stay stable across languages and serde configurations.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Render a JSON value canonically: recursive lexicographic key order, no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 over the canonical JSON rendering, hex-encoded.
pub fn row_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex HMAC-SHA256 over raw bytes.
pub fn hmac_sha256_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC can take a key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature over raw bytes.
///
/// The comparison runs in constant time via `Mac::verify_slice`. A signature
/// that is not valid hex fails without touching the MAC state.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC can take a key of any size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = json!({
            "zeta": {"b": 1, "a": 2},
            "alpha": [{"y": true, "x": false}],
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":[{"x":false,"y":true}],"zeta":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn test_row_hash_is_key_order_independent() {
        let a = json!({"symbol": "BTCZAR", "side": "BUY", "qty": "0.05"});
        let b = json!({"qty": "0.05", "side": "BUY", "symbol": "BTCZAR"});
        assert_eq!(row_hash(&a), row_hash(&b));
    }

    #[test]
    fn test_row_hash_detects_single_field_change() {
        let a = json!({"symbol": "BTCZAR", "qty": "0.05"});
        let b = json!({"symbol": "BTCZAR", "qty": "0.06"});
        assert_ne!(row_hash(&a), row_hash(&b));
    }

    #[test]
    fn test_hmac_round_trip() {
        let secret = b"warden-secret";
        let body = br#"{"symbol":"BTCZAR"}"#;
        let signature = hmac_sha256_hex(secret, body);
        assert!(verify_hmac_sha256(secret, body, &signature));
    }

    #[test]
    fn test_hmac_rejects_single_bit_flip() {
        let secret = b"warden-secret";
        let body = br#"{"symbol":"BTCZAR"}"#;
        let signature = hmac_sha256_hex(secret, body);

        let mut tampered = body.to_vec();
        tampered[0] ^= 0x01;
        assert!(!verify_hmac_sha256(secret, &tampered, &signature));

        let mut bad_sig = signature.into_bytes();
        bad_sig[0] = if bad_sig[0] == b'0' { b'1' } else { b'0' };
        assert!(!verify_hmac_sha256(
            secret,
            body,
            std::str::from_utf8(&bad_sig).unwrap()
        ));
    }

    #[test]
    fn test_hmac_rejects_non_hex_signature() {
        assert!(!verify_hmac_sha256(b"s", b"b", "zz-not-hex"));
    }
}
