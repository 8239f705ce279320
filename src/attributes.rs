//! Attribute value parsing (spec §4.5).
//!
//! Declared attribute raw values are strings until parsed according to their
//! declared type. Parsing never fails outright — a malformed value falls back
//! to the raw string verbatim, with a warning logged, so a bad declaration
//! degrades gracefully instead of aborting execution.

use serde_json::Value;
use tracing::warn;

use crate::machine::NodeAttribute;

/// Parse one declared attribute's raw value into a runtime [`serde_json::Value`].
///
/// - `number` parses as an `f64`/`i64` JSON number.
/// - `boolean` accepts exactly `"true"`/`"false"`.
/// - `string` de-quotes a surrounding matched pair of `"`/`'` if present.
/// - any other (or absent) type attempts a structured parse (JSON), falling
///   back to a de-quoted raw string.
///
/// On any parse failure the raw string is returned verbatim as a JSON string
/// and a warning is logged — this function never returns `Err`.
#[must_use]
pub fn parse_attribute_value(attr: &NodeAttribute) -> Value {
    match attr.attr_type.as_deref() {
        Some("number") => parse_number(&attr.raw_value, &attr.name),
        Some("boolean") => parse_boolean(&attr.raw_value, &attr.name),
        Some("string") => Value::String(dequote(&attr.raw_value)),
        _ => parse_structured(&attr.raw_value, &attr.name),
    }
}

fn parse_number(raw: &str, attr_name: &str) -> Value {
    if let Ok(i) = raw.trim().parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.trim().parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    warn!(attribute = attr_name, raw, "failed to parse number attribute, keeping raw string");
    Value::String(raw.to_string())
}

fn parse_boolean(raw: &str, attr_name: &str) -> Value {
    match raw.trim() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            warn!(attribute = attr_name, raw, "failed to parse boolean attribute, keeping raw string");
            Value::String(raw.to_string())
        }
    }
}

fn parse_structured(raw: &str, attr_name: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    warn!(
        attribute = attr_name,
        raw, "failed to parse structured attribute, falling back to de-quoted string"
    );
    Value::String(dequote(raw))
}

/// Strips one surrounding matched pair of `"` or `'` characters, if present.
fn dequote(raw: &str) -> String {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}
