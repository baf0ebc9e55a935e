//! The convergence loop: close the gap between a view's local and
//! remote version arrays.

use crate::error::SyncError;
use crate::flatten::{flatten_records, LinkSchema};
use crate::remote::Remote;
use rill::normalize::table_of;
use rill::{FastSet, Processor};
use rill_protocol::{diff, ArrayDiff, MutationKind, VersionArray, ViewUpdate};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds and timeouts of one convergence run.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileLimits {
    pub k_max: u32,
    pub rpc_timeout: Duration,
}

/// Tracks the (local, remote) array pair while the loop iterates.
pub struct ArraySyncer {
    local: VersionArray,
    remote: VersionArray,
}

impl ArraySyncer {
    /// Rejects remote arrays with duplicate ids as a protocol
    /// violation.
    pub fn new(local: VersionArray, remote: VersionArray) -> Result<Self, SyncError> {
        let mut seen: FastSet<&str> = FastSet::default();
        for (id, _) in &remote {
            if !seen.insert(id.as_str()) {
                return Err(SyncError::Protocol(format!(
                    "remote array contains duplicate id {}",
                    id
                )));
            }
        }
        Ok(Self { local, remote })
    }

    pub fn next_set(&self) -> ArrayDiff {
        diff(&self.local, &self.remote)
    }

    /// Refresh the local side from an emitted version array.
    pub fn update_local(&mut self, array: VersionArray) {
        self.local = array;
    }

    /// The remote's authoritative version of a record, if it appears in
    /// the remote array.
    pub fn remote_version(&self, id: &str) -> Option<u64> {
        self.remote
            .iter()
            .find(|(rid, _)| rid.as_str() == id)
            .map(|(_, v)| *v)
    }
}

pub struct ReconcileOutcome {
    pub converged: bool,
    pub iterations: u32,
    pub updates: Vec<ViewUpdate>,
}

/// Iteratively fetch what the remote has and the local side lacks,
/// ingest it authoritatively and adopt the remote versions, until the
/// arrays agree or `k_max` is exhausted.
///
/// The local array is never force-set to the remote one: every ingest
/// may pull new ids into the view (subqueries resolving references), so
/// the diff is recomputed from the actually materialized state each
/// round.
pub async fn converge<R: Remote>(
    processor: &Arc<RwLock<Processor>>,
    remote: &R,
    schema: &LinkSchema,
    view_id: &str,
    remote_hash: &str,
    remote_array: VersionArray,
    limits: ReconcileLimits,
) -> Result<ReconcileOutcome, SyncError> {
    let Some((mut local_hash, local_array)) =
        processor.read().unwrap().view_state(view_id)
    else {
        warn!(view_id, "sync event for an unregistered view, skipped");
        return Ok(ReconcileOutcome {
            converged: false,
            iterations: 0,
            updates: Vec::new(),
        });
    };

    let mut syncer = ArraySyncer::new(local_array, remote_array)?;
    let mut updates: Vec<ViewUpdate> = Vec::new();
    let mut iterations = 0;

    while iterations < limits.k_max {
        if local_hash == remote_hash {
            break;
        }
        let pending = syncer.next_set();
        if pending.is_empty() {
            // Arrays agree but the hash does not: nothing left to
            // fetch, the remote hash is unreachable.
            break;
        }
        iterations += 1;

        // The remote no longer knows these records: authoritative
        // deletes.
        for id in &pending.removed {
            let Some(table) = table_of(id).map(str::to_string) else {
                debug!(id = %id, "removed id without table prefix, skipped");
                continue;
            };
            let mut proc = processor.write().unwrap();
            updates.extend(proc.ingest(&table, MutationKind::Delete, id, None, false)?);
        }

        let ids = pending.fetch_ids();
        if !ids.is_empty() {
            // Single round trip for the whole added ∪ updated set.
            let records =
                match tokio::time::timeout(limits.rpc_timeout, remote.select_by_ids(&ids)).await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(SyncError::Remote(format!(
                            "select timed out after {:?}",
                            limits.rpc_timeout
                        )))
                    }
                };
            let records = flatten_records(records, schema);

            let mut proc = processor.write().unwrap();
            for record in records {
                let kind = if proc.store().record(&record.id).is_some() {
                    MutationKind::Update
                } else {
                    MutationKind::Create
                };
                updates.extend(proc.ingest(
                    &record.table,
                    kind,
                    &record.id,
                    Some(record.data),
                    false,
                )?);
                // Adopt the remote's authority over this record's
                // version without falsifying the content-bump rule.
                if let Some(version) = syncer.remote_version(&record.id) {
                    if let Some(update) = proc.set_record_version(view_id, &record.id, version)
                    {
                        updates.push(update);
                    }
                }
            }
        }

        match processor.read().unwrap().view_state(view_id) {
            Some((hash, array)) => {
                local_hash = hash;
                syncer.update_local(array);
            }
            None => break,
        }
    }

    let converged = local_hash == remote_hash;
    if !converged {
        warn!(
            view_id,
            iterations,
            local = %local_hash,
            remote = %remote_hash,
            "convergence did not settle"
        );
    } else {
        debug!(view_id, iterations, "view converged");
    }

    Ok(ReconcileOutcome {
        converged,
        iterations,
        updates,
    })
}
