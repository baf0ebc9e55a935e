//! The stream processor: owns the record store, the view registry and
//! the dependency index; turns record events into view updates.

use crate::engine::deps::DependencyIndex;
use crate::engine::store::Store;
use crate::engine::types::{Datum, FastSet, RecordKey};
use crate::engine::view::{QueryPlan, View};
use crate::error::EngineError;
use crate::normalize::{normalize_value, record_key};
use crate::parser::parse_query;
use indexmap::IndexMap;
use rill_protocol::{MutationKind, VersionArray, ViewSpec, ViewUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// One record mutation of a batch.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub table: String,
    pub kind: MutationKind,
    /// Local or canonical `table:local` id.
    pub id: String,
    pub data: Option<Value>,
}

#[derive(Default, Serialize, Deserialize)]
pub struct Processor {
    store: Store,
    views: IndexMap<String, View>,
    #[serde(skip)]
    deps: DependencyIndex,
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view and compute its initial result.
    ///
    /// Idempotent per id: re-registering the same query refreshes the
    /// TTL bookkeeping and answers with the current state. A different
    /// query or params under an existing id is a conflict. Nothing is
    /// installed if the initial evaluation fails.
    pub fn register_view(
        &mut self,
        spec: &ViewSpec,
        now_ms: u64,
    ) -> Result<ViewUpdate, EngineError> {
        if let Some(existing) = self.views.get_mut(&spec.id) {
            let params = spec.params.clone().map(Datum::from);
            if existing.sql != spec.sql || existing.params_differ(params.as_ref()) {
                return Err(EngineError::ViewConflict(spec.id.clone()));
            }
            existing.ttl_ms = spec.ttl_ms;
            existing.last_active_at = now_ms;
            debug!(view_id = %spec.id, "view already registered, refreshing lifetime");
            return Ok(existing.current_update());
        }

        let root = parse_query(&spec.sql)?;
        let tables = root.referenced_tables();
        let mut view = View::new(
            QueryPlan {
                id: spec.id.clone(),
                root,
            },
            spec.sql.clone(),
            spec.params.clone().map(Datum::from),
            spec.ttl_ms,
            now_ms,
        );

        let update = view
            .recompute(&self.store, &FastSet::default())?
            .unwrap_or_else(|| view.current_update());

        self.views.insert(spec.id.clone(), view);
        self.deps.register(&spec.id, tables);
        debug!(view_id = %spec.id, hash = %update.result_hash, "view registered");
        Ok(update)
    }

    /// Remove a view. Emits nothing.
    pub fn unregister_view(&mut self, view_id: &str) -> bool {
        self.deps.unregister(view_id);
        self.views.shift_remove(view_id).is_some()
    }

    /// Apply a single record event and recompute every affected view.
    ///
    /// `optimistic` marks a local write: the written record's version
    /// bumps even when the content is unchanged. Remote deliveries
    /// (`optimistic = false`) follow the content rule alone.
    ///
    /// A view whose evaluation fails is marked degraded and keeps its
    /// previous state; the other views still emit.
    pub fn ingest(
        &mut self,
        table: &str,
        kind: MutationKind,
        id: &str,
        data: Option<Value>,
        optimistic: bool,
    ) -> Result<Vec<ViewUpdate>, EngineError> {
        let mut updates = self.ingest_batch(
            vec![RecordEvent {
                table: table.to_string(),
                kind,
                id: id.to_string(),
                data,
            }],
            optimistic,
        )?;
        for update in &mut updates {
            update.op = Some(kind);
        }
        Ok(updates)
    }

    /// Apply a batch of record events in one pass: all storage writes
    /// first, then a single recomputation per affected view.
    pub fn ingest_batch(
        &mut self,
        events: Vec<RecordEvent>,
        optimistic: bool,
    ) -> Result<Vec<ViewUpdate>, EngineError> {
        let mut forced: FastSet<RecordKey> = FastSet::default();
        let mut touched: Vec<String> = Vec::with_capacity(events.len());

        // Storage phase.
        for event in events {
            let key = record_key(&event.table, &event.id);
            match event.kind {
                MutationKind::Create | MutationKind::Update => {
                    let Some(data) = event.data else {
                        return Err(EngineError::Storage(format!(
                            "missing payload for write to {}",
                            key
                        )));
                    };
                    let mut datum = Datum::from(normalize_value(data));
                    // Stored rows always carry their canonical id,
                    // whatever shape the ingested payload used.
                    if let Datum::Object(map) = &mut datum {
                        map.insert(smol_str::SmolStr::new("id"), Datum::Str(key.clone()));
                    }
                    let hash = datum.content_hash();
                    let changed =
                        self.store.ensure_table(&event.table).upsert(key.clone(), datum, hash);
                    // A byte-identical remote delivery cannot move any
                    // view: versions carry over and every hash stays put.
                    if !changed && !optimistic {
                        continue;
                    }
                    if optimistic {
                        forced.insert(key);
                    }
                }
                MutationKind::Delete => {
                    self.store.ensure_table(&event.table).delete(&key);
                }
            }
            touched.push(event.table);
        }

        touched.sort_unstable();
        touched.dedup();

        // Propagation phase: each affected view recomputes exactly once.
        let mut affected: Vec<String> = touched
            .iter()
            .flat_map(|table| self.deps.affected_by(table))
            .collect();
        affected.sort_unstable();
        affected.dedup();

        let mut updates = Vec::new();
        for view_id in affected {
            let Some(view) = self.views.get_mut(&view_id) else {
                continue;
            };
            match view.recompute(&self.store, &forced) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e) => {
                    warn!(view_id = %view_id, error = %e, "recomputation failed, view degraded");
                    view.degraded = true;
                }
            }
        }
        Ok(updates)
    }

    /// Adopt a remote-authored version for one record of one view.
    /// Unknown views or records are log-only no-ops.
    pub fn set_record_version(
        &mut self,
        view_id: &str,
        record_id: &str,
        version: u64,
    ) -> Option<ViewUpdate> {
        let Some(view) = self.views.get_mut(view_id) else {
            debug!(view_id, "set_record_version: unknown view");
            return None;
        };
        if !view.contains(record_id) {
            debug!(view_id, record_id, "set_record_version: record not in view");
            return None;
        }
        view.set_record_version(record_id, version)
    }

    /// Flag a view as degraded without touching its state (used when a
    /// remote response violates the protocol mid-convergence).
    pub fn mark_degraded(&mut self, view_id: &str) {
        if let Some(view) = self.views.get_mut(view_id) {
            view.degraded = true;
        }
    }

    /// Heartbeat: refresh a view's lifetime.
    pub fn touch(&mut self, view_id: &str, now_ms: u64) -> bool {
        match self.views.get_mut(view_id) {
            Some(view) => {
                view.last_active_at = now_ms;
                true
            }
            None => false,
        }
    }

    /// Drop every view whose TTL elapsed without a heartbeat.
    pub fn evict_expired(&mut self, now_ms: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .views
            .iter()
            .filter(|(_, v)| v.is_expired(now_ms))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            info!(view_id = %id, "view expired, unregistering");
            self.unregister_view(id);
        }
        expired
    }

    pub fn view(&self, view_id: &str) -> Option<&View> {
        self.views.get(view_id)
    }

    /// `(result hash, version array)` of a registered view.
    pub fn view_state(&self, view_id: &str) -> Option<(String, VersionArray)> {
        self.views
            .get(view_id)
            .map(|v| (v.last_hash.clone(), v.version_array()))
    }

    pub fn view_ids(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    /// Reconstruct the registration descriptor of a view (used to
    /// re-register degraded views with the remote).
    pub fn view_spec(&self, view_id: &str) -> Option<ViewSpec> {
        self.views.get(view_id).map(|v| ViewSpec {
            id: v.plan.id.clone(),
            sql: v.sql.clone(),
            params: v.params.clone().map(Value::from),
            ttl_ms: v.ttl_ms,
        })
    }

    pub fn affected_views(&self, table: &str) -> Vec<String> {
        self.deps.affected_by(table)
    }

    pub fn involved_tables(&self, view_id: &str) -> Option<&[String]> {
        self.deps.tables_of(view_id)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serialize the full processor state (store + registry).
    pub fn snapshot(&self) -> Result<Vec<u8>, EngineError> {
        cbor4ii::serde::to_vec(Vec::new(), self).map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Reload a snapshot; the dependency index is rebuilt from the
    /// restored plans.
    pub fn restore(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut processor: Processor = cbor4ii::serde::from_slice(bytes)
            .map_err(|e| EngineError::Corruption(e.to_string()))?;
        processor.rebuild_deps();
        Ok(processor)
    }

    fn rebuild_deps(&mut self) {
        self.deps.clear();
        for (id, view) in &self.views {
            self.deps.register(id, view.plan.root.referenced_tables());
        }
    }
}
