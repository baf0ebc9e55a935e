//! Local record store: the processor-side materialization of C1.
//!
//! Rows are kept per table in insertion order (the result order of a
//! view without `ORDER BY`), together with the content hash of the
//! normalized record.

use crate::engine::types::{Datum, FastMap, RecordKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    rows: IndexMap<RecordKey, Datum>,
    hashes: FastMap<RecordKey, String>,
}

impl Table {
    pub fn new(name: String) -> Self {
        Self {
            name,
            rows: IndexMap::new(),
            hashes: FastMap::default(),
        }
    }

    /// Insert or replace a row. Returns true when the content hash
    /// changed (a genuinely new or modified record).
    pub fn upsert(&mut self, key: RecordKey, data: Datum, hash: String) -> bool {
        let changed = self.hashes.get(&key) != Some(&hash);
        self.rows.insert(key.clone(), data);
        self.hashes.insert(key, hash);
        changed
    }

    /// Remove a row, preserving the order of the remaining ones.
    pub fn delete(&mut self, key: &str) -> bool {
        self.hashes.remove(key);
        self.rows.shift_remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.rows.get(key)
    }

    pub fn hash_of(&self, key: &str) -> Option<&str> {
        self.hashes.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Insertion-ordered iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &Datum)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Store {
    tables: FastMap<String, Table>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_table(&mut self, name: &str) -> &mut Table {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Table::new(name.to_string()))
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Point read by canonical `table:local` key.
    pub fn record(&self, key: &str) -> Option<&Datum> {
        let (table, _) = key.split_once(':')?;
        self.tables.get(table)?.get(key)
    }

    /// Content hash of a stored record, if present.
    pub fn record_hash(&self, key: &str) -> Option<&str> {
        let (table, _) = key.split_once(':')?;
        self.tables.get(table)?.hash_of(key)
    }
}
