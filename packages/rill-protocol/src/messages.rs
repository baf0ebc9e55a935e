//! Messages crossing the processor/reconciler boundary and the wire to
//! the remote replica.

use crate::version_array::VersionArray;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Emitted whenever a view's result hash changes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ViewUpdate {
    pub view_id: String,
    /// Lowercase hex, 64 chars.
    pub result_hash: String,
    /// Sorted by id.
    pub records: VersionArray,
    /// The operation that triggered the update; absent for
    /// registrations and version adoptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<MutationKind>,
}

/// Descriptor of a registered query. Immutable after registration apart
/// from the TTL bookkeeping.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ViewSpec {
    pub id: String,
    pub sql: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Logical lifetime in milliseconds; the view is evicted when no
    /// heartbeat arrives within this window.
    pub ttl_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A local write pending upload. Durable until the remote acknowledges.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Mutation {
    pub seq: u64,
    pub kind: MutationKind,
    /// Canonical `table:local` record id.
    pub id: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Remote-originated work for the downloader.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DownEvent {
    Register(ViewSpec),
    Sync {
        view_id: String,
        remote_hash: String,
        remote_array: VersionArray,
    },
    Heartbeat {
        view_id: String,
    },
    Cleanup {
        view_id: String,
    },
}

/// A record as returned by the remote's select.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteRecord {
    /// Canonical `table:local` id.
    pub id: String,
    pub table: String,
    pub data: Value,
}

/// The remote's answer to a view registration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteViewState {
    pub hash: String,
    pub records: VersionArray,
}

/// One entry of the remote live stream, scoped to a client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveUpdate {
    pub view_id: String,
    pub hash: String,
    pub records: VersionArray,
}
