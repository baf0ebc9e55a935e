//! Normalization of ingested data.
//!
//! Record ids may arrive as `"table:local"` strings or as objects of
//! the shape `{tb|table, id}`. Everything is normalized to the
//! canonical string form before hashing, so that two processors fed the
//! same logical data produce identical digests.

use crate::engine::types::Datum;
use serde_json::Value;
use smol_str::SmolStr;

/// Render a `(table, local)` pair canonically.
pub fn record_key(table: &str, local: &str) -> SmolStr {
    if local.contains(':') {
        SmolStr::new(local)
    } else {
        SmolStr::new(format!("{}:{}", table, local))
    }
}

/// Table component of a canonical record id.
pub fn table_of(key: &str) -> Option<&str> {
    key.split_once(':').map(|(table, _)| table)
}

/// Recursively normalize a JSON value: id-shaped objects collapse to
/// their canonical string rendering, string-embedded JSON is left alone.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(id) = id_object_to_string(&map) {
                return Value::String(id);
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, normalize_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_value).collect()),
        other => other,
    }
}

/// `Datum` variant of the same normalization, used when resolving
/// correlated references during evaluation.
pub fn normalize_record_id(value: Datum) -> Datum {
    if let Datum::Object(map) = &value {
        let table = map.get("tb").or_else(|| map.get("table"));
        let id = map.get("id");
        if let (Some(table), Some(id)) = (table, id) {
            let table = match table {
                Datum::Str(s) => s.to_string(),
                Datum::Number(n) => n.to_string(),
                _ => return value,
            };
            let id = match id {
                Datum::Str(s) => s.to_string(),
                Datum::Number(n) => n.to_string(),
                _ => return value,
            };
            return Datum::Str(SmolStr::new(format!("{}:{}", table, id)));
        }
    }
    value
}

fn id_object_to_string(map: &serde_json::Map<String, Value>) -> Option<String> {
    if map.len() != 2 {
        return None;
    }
    let table = map.get("tb").or_else(|| map.get("table"))?;
    let id = map.get("id")?;
    let table = match table {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let id = match id {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(format!("{}:{}", table, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_objects_collapse() {
        let v = normalize_value(json!({"author": {"tb": "author", "id": "a"}}));
        assert_eq!(v, json!({"author": "author:a"}));
    }

    #[test]
    fn table_key_variant() {
        let v = normalize_value(json!({"author": {"table": "author", "id": 7}}));
        assert_eq!(v, json!({"author": "author:7"}));
    }

    #[test]
    fn nested_arrays_are_walked() {
        let v = normalize_value(json!({"refs": [{"tb": "t", "id": "x"}, 1]}));
        assert_eq!(v, json!({"refs": ["t:x", 1]}));
    }

    #[test]
    fn wider_objects_are_untouched() {
        let v = json!({"tb": "t", "id": "x", "extra": true});
        assert_eq!(normalize_value(v.clone()), v);
    }

    #[test]
    fn record_key_is_idempotent() {
        assert_eq!(record_key("user", "1"), "user:1");
        assert_eq!(record_key("user", "user:1"), "user:1");
    }
}
