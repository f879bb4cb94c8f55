//! Semantic field comparison
//!
//! [`values_equal`] decides whether a stored value and a freshly fetched value
//! describe the same thing. It is the only gate between "no-op" and "update",
//! so it has to see through representation differences the datastore and the
//! source API introduce:
//!
//! - null / missing / empty string are all blank
//! - blank equals numeric zero
//! - integers equal floats with the same value
//! - booleans equal `0` / `1`
//! - embedded JSON text equals the parsed document (key order and whitespace ignored)
//! - timestamps equal after dropping sub-second precision and the zone suffix
//!
//! Anything else falls back to exact equality.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2})(?:[T ](\d{2}:\d{2})(?::(\d{2}))?(?:\.\d+)?)?\s*(?:Z|[+-]\d{2}:?\d{2}|UTC)?$",
        )
        .unwrap_or_else(|e| unreachable!("timestamp pattern is a valid regex: {}", e))
    })
}

/// Normalized representation used for comparison
#[derive(Debug, Clone, PartialEq)]
enum Canonical<'a> {
    Blank,
    Number(&'a Number),
    Bool(bool),
    Timestamp(String),
    Text(&'a str),
    Document(Value),
    Array(&'a [Value]),
    Object(&'a Map<String, Value>),
}

/// Normalize a timestamp-looking string to `YYYY-MM-DD HH:MM:SS`.
///
/// Returns `None` when the string is not a date or date-time.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let caps = timestamp_pattern().captures(raw.trim())?;
    let date = caps.get(1)?.as_str();
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hm = caps.get(2).map_or("00:00", |m| m.as_str());
    let secs = caps.get(3).map_or("00", |m| m.as_str());
    Some(format!("{} {}:{}", date, hm, secs))
}

fn canonical(value: &Value) -> Canonical<'_> {
    match value {
        Value::Null => Canonical::Blank,
        Value::Bool(b) => Canonical::Bool(*b),
        Value::Number(n) => Canonical::Number(n),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Canonical::Blank;
            }
            if let Some(ts) = normalize_timestamp(trimmed) {
                return Canonical::Timestamp(ts);
            }
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(doc) = serde_json::from_str::<Value>(trimmed) {
                    return Canonical::Document(doc);
                }
            }
            Canonical::Text(s.as_str())
        },
        Value::Array(items) => Canonical::Array(items),
        Value::Object(map) => Canonical::Object(map),
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))
}

/// Integers compare exactly; f64 only when one side is a float.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (integer(a), integer(b)) {
        (Some(x), Some(y)) => x == y,
        _ => matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y),
    }
}

fn is_zero(n: &Number) -> bool {
    match integer(n) {
        Some(i) => i == 0,
        None => n.as_f64() == Some(0.0),
    }
}

fn bool_matches_number(b: bool, n: &Number) -> bool {
    match integer(n) {
        Some(i) => i == i128::from(b),
        None => n.as_f64() == Some(if b { 1.0 } else { 0.0 }),
    }
}

fn arrays_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn objects_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.keys().chain(b.keys()).all(|key| {
        values_equal(
            a.get(key).unwrap_or(&Value::Null),
            b.get(key).unwrap_or(&Value::Null),
        )
    })
}

fn structured_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => arrays_equal(x, y),
        (Value::Object(x), Value::Object(y)) => objects_equal(x, y),
        _ => false,
    }
}

/// Whether `existing` and `incoming` hold the same logical value.
///
/// Reflexive and symmetric for every input.
pub fn values_equal(existing: &Value, incoming: &Value) -> bool {
    use Canonical::*;

    match (canonical(existing), canonical(incoming)) {
        (Blank, Blank) => true,
        (Blank, Number(n)) | (Number(n), Blank) => is_zero(n),
        (Number(a), Number(b)) => numbers_equal(a, b),
        (Bool(a), Bool(b)) => a == b,
        (Bool(b), Number(n)) | (Number(n), Bool(b)) => bool_matches_number(b, n),
        (Timestamp(a), Timestamp(b)) => a == b,
        (Text(a), Text(b)) => a == b,
        (Document(a), Document(b)) => structured_equal(&a, &b),
        (Document(doc), Array(items)) | (Array(items), Document(doc)) => {
            structured_equal(&doc, &Value::Array(items.to_vec()))
        },
        (Document(doc), Object(map)) | (Object(map), Document(doc)) => {
            structured_equal(&doc, &Value::Object(map.clone()))
        },
        (Array(a), Array(b)) => arrays_equal(a, b),
        (Object(a), Object(b)) => objects_equal(a, b),
        _ => existing == incoming,
    }
}

/// Compare two field maps.
///
/// With `compare_fields` only the named fields are inspected; otherwise every
/// field present in `incoming` is. A field missing from either side compares
/// as blank.
pub fn fields_equal(
    existing: &Map<String, Value>,
    incoming: &Map<String, Value>,
    compare_fields: Option<&[String]>,
) -> bool {
    let field_equal = |name: &str| {
        values_equal(
            existing.get(name).unwrap_or(&Value::Null),
            incoming.get(name).unwrap_or(&Value::Null),
        )
    };

    match compare_fields {
        Some(names) => names.iter().all(|name| field_equal(name)),
        None => incoming.keys().all(|name| field_equal(name)),
    }
}

/// Names of fields whose values differ, for debug logging of updates.
pub fn changed_fields(
    existing: &Map<String, Value>,
    incoming: &Map<String, Value>,
    compare_fields: Option<&[String]>,
) -> Vec<String> {
    let candidates: Vec<&String> = match compare_fields {
        Some(names) => names.iter().collect(),
        None => incoming.keys().collect(),
    };

    candidates
        .into_iter()
        .filter(|name| {
            !values_equal(
                existing.get(name.as_str()).unwrap_or(&Value::Null),
                incoming.get(name.as_str()).unwrap_or(&Value::Null),
            )
        })
        .cloned()
        .collect()
}
