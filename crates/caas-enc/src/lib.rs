//! Canonical JSON encoding and SHA-256 commitment hashing.
//!
//! Every cryptographic commitment in the audit pipeline — policy commitment
//! hashes, audit record hashes, Merkle leaves and internal nodes — is a
//! SHA-256 digest over a *canonical* byte form. The whitespace policy and key
//! ordering chosen here are part of the commitment: changing either would
//! silently invalidate every previously issued hash. See `CanonicalValue`.

use sha2::{Digest, Sha256};

/// The all-zero previous-hash used for the first record in a ledger.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const _: () = assert!(GENESIS_HASH.len() == 64);

/// `sha256_hex` renders digests as lowercase hex with no `0x` prefix,
/// exactly 64 characters — the wire form used everywhere in this system.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

/// True iff `s` looks like a hash this system produced: 64 lowercase hex
/// characters.
pub fn is_well_formed_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// An ordered JSON value used to build canonical byte forms.
///
/// This is deliberately not `serde_json::Value`: `serde_json::Map` sorts its
/// keys only when the `preserve_order` feature is disabled (alphabetically,
/// via an internal `BTreeMap`), and alphabetical order is not the order this
/// system's canonicalization rules require at the top level (e.g. a policy's
/// top-level keys are `PolicyId, Version, Name, Statements` — not
/// alphabetical). `CanonicalValue::Object` preserves exactly the insertion
/// order its caller gives it.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<CanonicalValue>),
    Object(Vec<(String, CanonicalValue)>),
}

impl CanonicalValue {
    pub fn object(fields: Vec<(&str, CanonicalValue)>) -> Self {
        CanonicalValue::Object(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn string<S: Into<String>>(s: S) -> Self {
        CanonicalValue::String(s.into())
    }

    pub fn array_of_strings<I: IntoIterator<Item = S>, S: Into<String>>(items: I) -> Self {
        CanonicalValue::Array(items.into_iter().map(|s| CanonicalValue::String(s.into())).collect())
    }

    /// Recursively converts a `serde_json::Value` into a `CanonicalValue`,
    /// sorting object keys ASCII-lexicographically at every nesting level.
    /// This implements canonicalization rule 6 (conditions/metadata key
    /// ordering) without imposing any ordering on array elements — arrays
    /// are positional data, not sets, and are left as-is.
    pub fn from_json_sorted(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CanonicalValue::Null,
            serde_json::Value::Bool(b) => CanonicalValue::Bool(*b),
            serde_json::Value::Number(n) => CanonicalValue::Number(n.clone()),
            serde_json::Value::String(s) => CanonicalValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                CanonicalValue::Array(items.iter().map(CanonicalValue::from_json_sorted).collect())
            }
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                CanonicalValue::Object(
                    keys.into_iter()
                        .map(|k| (k.clone(), CanonicalValue::from_json_sorted(&map[k])))
                        .collect(),
                )
            }
        }
    }

    /// Serializes to the fixed canonical byte form: compact UTF-8 JSON, no
    /// insignificant whitespace, objects and arrays rendered in exactly the
    /// order given. This whitespace policy is pinned for the life of this
    /// system per the commitment-stability rule in the design notes; it must
    /// never change.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write(&mut out);
        out.into_bytes()
    }

    /// Convenience: SHA-256 of `to_canonical_bytes()`, hex-encoded.
    pub fn commitment_hash(&self) -> String {
        sha256_hex(&self.to_canonical_bytes())
    }

    fn write(&self, out: &mut String) {
        match self {
            CanonicalValue::Null => out.push_str("null"),
            CanonicalValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            CanonicalValue::Number(n) => out.push_str(&n.to_string()),
            CanonicalValue::String(s) => write_json_string(s, out),
            CanonicalValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
            CanonicalValue::Object(fields) => {
                out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_string(key, out);
                    out.push(':');
                    value.write(out);
                }
                out.push('}');
            }
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn genesis_hash_is_64_zero_chars() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn sha256_hex_is_64_lowercase_hex_chars() {
        let h = sha256_hex(b"hello");
        assert_eq!(h.len(), 64);
        assert!(is_well_formed_hash(&h));
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"same input"), sha256_hex(b"same input"));
    }

    #[test]
    fn canonical_value_has_no_insignificant_whitespace() {
        let v = CanonicalValue::object(vec![
            ("a", CanonicalValue::string("x")),
            ("b", CanonicalValue::Array(vec![CanonicalValue::Number(1.into())])),
        ]);
        let bytes = v.to_canonical_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"a":"x","b":[1]}"#);
    }

    #[test]
    fn object_preserves_given_order_not_alphabetical() {
        let v = CanonicalValue::object(vec![
            ("Zebra", CanonicalValue::Bool(true)),
            ("Apple", CanonicalValue::Bool(false)),
        ]);
        let text = String::from_utf8(v.to_canonical_bytes()).unwrap();
        assert_eq!(text, r#"{"Zebra":true,"Apple":false}"#);
    }

    #[test]
    fn from_json_sorted_orders_nested_keys() {
        let json = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        let canon = CanonicalValue::from_json_sorted(&json);
        let text = String::from_utf8(canon.to_canonical_bytes()).unwrap();
        assert_eq!(text, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn string_escaping_handles_control_and_quote_chars() {
        let v = CanonicalValue::string("line\nwith\"quote\\and\ttab");
        let text = String::from_utf8(v.to_canonical_bytes()).unwrap();
        assert_eq!(text, r#""line\nwith\"quote\\and\ttab""#);
    }

    proptest! {
        #[test]
        fn commitment_hash_is_deterministic_for_arbitrary_strings(s in "\\PC*") {
            let a = CanonicalValue::string(s.clone()).commitment_hash();
            let b = CanonicalValue::string(s).commitment_hash();
            prop_assert_eq!(a, b);
        }
    }
}
