//! Per-view materialized state and recomputation.

use crate::engine::eval::{evaluate, ResultRow};
use crate::engine::operators::Operator;
use crate::engine::store::Store;
use crate::engine::types::{Datum, FastMap, FastSet, RecordKey, VersionMap};
use crate::error::EngineError;
use rill_protocol::{result_hash, VersionArray, ViewUpdate};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueryPlan {
    pub id: String,
    pub root: Operator,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct View {
    pub plan: QueryPlan,
    pub sql: String,
    pub params: Option<Datum>,
    pub ttl_ms: u64,
    /// Wall clock, epoch milliseconds; refreshed by heartbeats.
    pub last_active_at: u64,
    rows: Vec<ResultRow>,
    versions: VersionMap,
    /// Content hash per id, scoped to this view's projection.
    row_hashes: FastMap<RecordKey, String>,
    pub last_hash: String,
    /// Last recomputation failed; state is the previous one and the
    /// view is excluded from emission until a recomputation succeeds.
    #[serde(default)]
    pub degraded: bool,
}

impl View {
    pub fn new(
        plan: QueryPlan,
        sql: String,
        params: Option<Datum>,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            plan,
            sql,
            params,
            ttl_ms,
            last_active_at: now_ms,
            rows: Vec::new(),
            versions: VersionMap::default(),
            row_hashes: FastMap::default(),
            last_hash: String::new(),
            degraded: false,
        }
    }

    /// Re-evaluate against the store and derive the next version array.
    ///
    /// Versions carry over when the projected content (subquery
    /// expansions included) is byte-identical; otherwise they bump, and
    /// a fresh row starts at 1. `forced_bumps` holds the directly
    /// written records of an optimistic ingest, whose versions bump
    /// even on identical content.
    ///
    /// Returns an update only when the result hash changed. On error
    /// the state is left untouched; the caller decides about the
    /// degraded flag.
    pub fn recompute(
        &mut self,
        store: &Store,
        forced_bumps: &FastSet<RecordKey>,
    ) -> Result<Option<ViewUpdate>, EngineError> {
        let output = evaluate(&self.plan.root, self.params.as_ref(), store)?;

        // Primary rows first, then subquery children not already seen.
        let mut entries: Vec<(RecordKey, String)> = Vec::with_capacity(output.rows.len());
        let mut seen: FastSet<RecordKey> = FastSet::default();
        for row in output.rows.iter().chain(output.children.iter()) {
            if seen.insert(row.id.clone()) {
                entries.push((row.id.clone(), row.data.content_hash()));
            }
        }

        let mut versions = VersionMap::default();
        let mut row_hashes = FastMap::default();
        for (id, hash) in &entries {
            let version = match self.versions.get(id) {
                None => 1,
                Some(&prev) => {
                    let unchanged = self.row_hashes.get(id).map(String::as_str)
                        == Some(hash.as_str());
                    let forced = forced_bumps.contains(id.as_str());
                    if unchanged && !forced {
                        prev
                    } else {
                        prev + 1
                    }
                }
            };
            versions.insert(id.clone(), version);
            row_hashes.insert(id.clone(), hash.clone());
        }

        let mut array: VersionArray = entries
            .iter()
            .map(|(id, _)| (id.to_string(), versions[id]))
            .collect();
        array.sort_by(|a, b| a.0.cmp(&b.0));
        let new_hash = result_hash(&array);

        self.rows = output.rows;
        self.versions = versions;
        self.row_hashes = row_hashes;
        self.degraded = false;

        if new_hash != self.last_hash {
            self.last_hash = new_hash.clone();
            Ok(Some(ViewUpdate {
                view_id: self.plan.id.clone(),
                result_hash: new_hash,
                records: array,
                op: None,
            }))
        } else {
            Ok(None)
        }
    }

    /// Adopt an authoritative version for one record, bypassing the
    /// content rule. Returns an update when the hash changed, `None`
    /// for unknown records or no-op writes.
    pub fn set_record_version(&mut self, record_id: &str, version: u64) -> Option<ViewUpdate> {
        let current = *self.versions.get(record_id)?;
        if current == version {
            return None;
        }
        self.versions.insert(SmolStr::new(record_id), version);

        let array = self.version_array();
        let new_hash = result_hash(&array);
        if new_hash != self.last_hash {
            self.last_hash = new_hash.clone();
            Some(ViewUpdate {
                view_id: self.plan.id.clone(),
                result_hash: new_hash,
                records: array,
                op: None,
            })
        } else {
            None
        }
    }

    /// Current version array, sorted by id.
    pub fn version_array(&self) -> VersionArray {
        let mut array: VersionArray = self
            .versions
            .iter()
            .map(|(id, v)| (id.to_string(), *v))
            .collect();
        array.sort_by(|a, b| a.0.cmp(&b.0));
        array
    }

    /// The current state rendered as an update (idempotent
    /// re-registration answers with this).
    pub fn current_update(&self) -> ViewUpdate {
        ViewUpdate {
            view_id: self.plan.id.clone(),
            result_hash: self.last_hash.clone(),
            records: self.version_array(),
            op: None,
        }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.versions.contains_key(record_id)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_active_at) > self.ttl_ms
    }

    /// True when `params` differ in content from `other`.
    pub fn params_differ(&self, other: Option<&Datum>) -> bool {
        self.params.as_ref() != other
    }
}
