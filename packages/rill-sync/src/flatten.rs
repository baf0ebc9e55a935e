//! Relationship flattening of remote result sets.
//!
//! Remote selects may return relationship-expanded records: a link
//! field holds the whole nested record instead of its id. Before
//! caching locally, every nested record on a schema-declared link
//! field is hoisted into the top-level list and the field is replaced
//! by the record's canonical id. A visited set bounds cyclic
//! references to one traversal.

use rill::normalize::normalize_value;
use rill::{FastMap, FastSet};
use rill_protocol::RemoteRecord;
use serde_json::Value;
use tracing::debug;

/// The link fields eligible for flattening, declared per table.
#[derive(Debug, Default, Clone)]
pub struct LinkSchema {
    links: FastMap<String, FastSet<String>>,
}

impl LinkSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(mut self, table: &str, field: &str) -> Self {
        self.links
            .entry(table.to_string())
            .or_default()
            .insert(field.to_string());
        self
    }

    pub fn is_link(&self, table: &str, field: &str) -> bool {
        self.links
            .get(table)
            .map(|fields| fields.contains(field))
            .unwrap_or(false)
    }
}

/// Flatten a remote result set. Parents precede the children extracted
/// from them; duplicates (and cycles) are emitted once.
pub fn flatten_records(records: Vec<RemoteRecord>, schema: &LinkSchema) -> Vec<RemoteRecord> {
    let mut out = Vec::with_capacity(records.len());
    let mut visited: FastSet<String> = FastSet::default();
    for record in records {
        flatten_one(record, schema, &mut visited, &mut out);
    }
    out
}

fn flatten_one(
    mut record: RemoteRecord,
    schema: &LinkSchema,
    visited: &mut FastSet<String>,
    out: &mut Vec<RemoteRecord>,
) {
    if !visited.insert(record.id.clone()) {
        return;
    }

    let mut nested: Vec<RemoteRecord> = Vec::new();
    if let Value::Object(map) = &mut record.data {
        for (field, value) in map.iter_mut() {
            if !schema.is_link(&record.table, field) {
                continue;
            }
            match value {
                Value::Object(_) => {
                    if let Some(child) = extract_child(value) {
                        nested.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if item.is_object() {
                            if let Some(child) = extract_child(item) {
                                nested.push(child);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    out.push(record);
    for child in nested {
        flatten_one(child, schema, visited, out);
    }
}

/// Replace a nested record value by its id and return it as a
/// top-level record. Nests without a usable id are left intact.
fn extract_child(value: &mut Value) -> Option<RemoteRecord> {
    let id = value
        .as_object()
        .and_then(|obj| obj.get("id"))
        .map(|id| normalize_value(id.clone()));

    let id = match id {
        Some(Value::String(s)) if s.contains(':') => s,
        other => {
            debug!(id = ?other, "nested record without canonical id, left intact");
            return None;
        }
    };
    let table = id.split_once(':').map(|(t, _)| t.to_string())?;

    let data = std::mem::replace(value, Value::String(id.clone()));
    Some(RemoteRecord { id, table, data })
}
