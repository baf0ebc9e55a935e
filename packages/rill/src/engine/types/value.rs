use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smol_str::SmolStr;

pub type FastMap<K, V> = FxHashMap<K, V>;
pub type FastSet<T> = FxHashSet<T>;

/// Canonical `table:local` record id.
pub type RecordKey = SmolStr;

/// Owned JSON-compatible value as stored in the record store and
/// flowing through evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Number(f64),
    Str(SmolStr),
    Array(Vec<Datum>),
    Object(FastMap<SmolStr, Datum>),
}

impl Default for Datum {
    fn default() -> Self {
        Datum::Null
    }
}

impl Datum {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&FastMap<SmolStr, Datum>> {
        match self {
            Datum::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Datum>> {
        match self {
            Datum::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.as_object()?.get(key)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Canonical textual rendering. `serde_json`'s default map is
    /// ordered, so converting through `Value` yields sorted object keys
    /// and therefore a stable byte sequence for identical content.
    pub fn canonical_string(&self) -> String {
        Value::from(self.clone()).to_string()
    }

    /// Content hash over the canonical rendering, lowercase hex.
    pub fn content_hash(&self) -> String {
        blake3::hash(self.canonical_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(b),
            Value::Number(n) => Datum::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => Datum::Str(SmolStr::from(s)),
            Value::Array(arr) => Datum::Array(arr.into_iter().map(Datum::from).collect()),
            Value::Object(obj) => Datum::Object(
                obj.into_iter()
                    .map(|(k, v)| (SmolStr::from(k), Datum::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Datum> for Value {
    fn from(d: Datum) -> Self {
        match d {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(b),
            Datum::Number(n) => json!(n),
            Datum::Str(s) => Value::String(s.to_string()),
            Datum::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            Datum::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k.to_string(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_sorts_keys() {
        let a: Datum = serde_json::json!({"b": 1, "a": 2}).into();
        let b: Datum = serde_json::json!({"a": 2, "b": 1}).into();
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn content_hash_tracks_content() {
        let a: Datum = serde_json::json!({"name": "alice"}).into();
        let b: Datum = serde_json::json!({"name": "alice"}).into();
        let c: Datum = serde_json::json!({"name": "bob"}).into();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn nested_get() {
        let d: Datum = serde_json::json!({"user": {"name": "alice"}}).into();
        let name = d.get("user").and_then(|u| u.get("name"));
        assert_eq!(name.and_then(Datum::as_str), Some("alice"));
    }
}
