//! Deterministic JSON forms.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// Top-level pipeline keys that change on every heartbeat.
pub const VOLATILE_KEYS: [&str; 4] = ["TIME", "SESSION_ID", "LAST_UPDATE_TIME", "plugins"];

/// Strip volatile top-level keys, then sort maps and comparable lists
/// recursively.
///
/// Idempotent: applying it twice yields the same value.
#[must_use]
pub fn normalize_and_sort(pipeline: &Value) -> Value {
    match pipeline {
        Value::Object(map) => {
            let mut stripped = map.clone();
            for key in VOLATILE_KEYS {
                stripped.remove(key);
            }
            sort_value(&Value::Object(stripped))
        }
        other => sort_value(other),
    }
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sorted_map(map, sort_value)),
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(sort_value).collect();
            if let Some(order) = comparable(&items) {
                items.sort_by(order);
            }
            Value::Array(items)
        }
        other => other.clone(),
    }
}

type Order = fn(&Value, &Value) -> Ordering;

fn by_str(a: &Value, b: &Value) -> Ordering {
    a.as_str().cmp(&b.as_str())
}

fn by_number(a: &Value, b: &Value) -> Ordering {
    let a = a.as_f64().unwrap_or_default();
    let b = b.as_f64().unwrap_or_default();
    a.total_cmp(&b)
}

/// Lists of only strings or only numbers can be ordered; anything else keeps
/// its order.
fn comparable(items: &[Value]) -> Option<Order> {
    if items.iter().all(Value::is_string) {
        Some(by_str as Order)
    } else if items.iter().all(Value::is_number) {
        Some(by_number as Order)
    } else {
        None
    }
}

fn sorted_map(map: &Map<String, Value>, inner: fn(&Value) -> Value) -> Map<String, Value> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|k| map.get(k).map(|v| (k.clone(), inner(v))))
        .collect()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sorted_map(map, sort_keys)),
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with object keys sorted at every depth. List order is kept.
///
/// This is the byte string request signatures are computed over.
#[must_use]
pub fn to_canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}
