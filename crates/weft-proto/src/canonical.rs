// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical JSON encoding for hash commitments.
//!
//! Enforces:
//! - Object keys sorted by byte order; emission order is independent of
//!   insertion order
//! - No insignificant whitespace
//! - Integers rendered without fraction or exponent; floats in serde_json's
//!   shortest round-trip (ryu) form
//! - String escaping limited to `"` `\` and control characters (`\n` `\r`
//!   `\t` `\b` `\f` shortcuts, `\u00XX` otherwise)
//!
//! Only bytes that feed the integrity hash go through this encoder; the
//! rest of the wire is ordinary `serde_json`.

use serde_json::Value;

/// Encode a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json renders i64/u64 exactly and f64 via ryu (shortest
        // round-trip), both deterministic.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_value(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_bytewise() {
        let v = json!({"b": 1, "a": 2, "ab": 3});
        assert_eq!(canonical_json(&v), r#"{"a":2,"ab":3,"b":1}"#);
    }

    #[test]
    fn nested_objects_sorted_recursively() {
        let v = json!({"z": {"y": 1, "x": [true, null]}, "a": "s"});
        assert_eq!(canonical_json(&v), r#"{"a":"s","z":{"x":[true,null],"y":1}}"#);
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"k1": 1, "k2": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"k2": 2, "k1": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn numbers_are_deterministic() {
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!(-7)), "-7");
        assert_eq!(canonical_json(&json!(0.5)), "0.5");
        assert_eq!(canonical_json(&json!(u64::MAX)), "18446744073709551615");
    }

    #[test]
    fn control_characters_escaped() {
        assert_eq!(canonical_json(&json!("a\"b\\c\n")), r#""a\"b\\c\n""#);
        assert_eq!(canonical_json(&json!("\u{0001}")), "\"\\u0001\"");
    }
}
