#![allow(dead_code)]

use rill::Processor;
use rill_protocol::{MutationKind, ViewSpec, ViewUpdate};
use serde_json::Value;

pub const DEFAULT_TTL_MS: u64 = 600_000;

pub fn setup() -> Processor {
    Processor::new()
}

/// Local (optimistic) write.
pub fn ingest(
    processor: &mut Processor,
    table: &str,
    kind: MutationKind,
    id: &str,
    data: Value,
) -> Vec<ViewUpdate> {
    processor
        .ingest(table, kind, id, Some(data), true)
        .expect("ingest failed")
}

/// Remote (authoritative) write.
pub fn ingest_remote(
    processor: &mut Processor,
    table: &str,
    kind: MutationKind,
    id: &str,
    data: Value,
) -> Vec<ViewUpdate> {
    processor
        .ingest(table, kind, id, Some(data), false)
        .expect("ingest failed")
}

pub fn delete(processor: &mut Processor, table: &str, id: &str) -> Vec<ViewUpdate> {
    processor
        .ingest(table, MutationKind::Delete, id, None, true)
        .expect("delete failed")
}

pub fn spec(id: &str, sql: &str) -> ViewSpec {
    spec_with_params(id, sql, None)
}

pub fn spec_with_params(id: &str, sql: &str, params: Option<Value>) -> ViewSpec {
    ViewSpec {
        id: id.to_string(),
        sql: sql.to_string(),
        params,
        ttl_ms: DEFAULT_TTL_MS,
    }
}

pub fn register(processor: &mut Processor, id: &str, sql: &str) -> ViewUpdate {
    processor
        .register_view(&spec(id, sql), 0)
        .expect("register failed")
}

pub fn versions(update: &ViewUpdate) -> Vec<(&str, u64)> {
    update
        .records
        .iter()
        .map(|(id, v)| (id.as_str(), *v))
        .collect()
}
