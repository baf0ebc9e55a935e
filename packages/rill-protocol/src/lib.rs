//! Wire-level result model shared by the stream processor and the
//! sync reconciler: version arrays, result hashes, diffs and the
//! messages exchanged with a remote replica.

pub mod messages;
pub mod version_array;

pub use messages::{
    DownEvent, LiveUpdate, Mutation, MutationKind, RemoteRecord, RemoteViewState, ViewSpec,
    ViewUpdate,
};
pub use version_array::{diff, empty_hash, result_hash, ArrayDiff, VersionArray};
