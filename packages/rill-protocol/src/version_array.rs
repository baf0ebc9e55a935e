//! Version arrays and their canonical hash.
//!
//! A version array captures a view's result shape as an ordered list of
//! `(record id, version)` pairs. The hash is computed over the array
//! sorted by id, so two processors that reached the same state through
//! different insertion orders produce byte-identical digests.

/// Ordered sequence of `(record id, version)` pairs.
///
/// On the wire this is a sequence of `(utf8 id, u64 version)`; the hash
/// below is the 32-byte digest rendered as lowercase hex.
pub type VersionArray = Vec<(String, u64)>;

/// Outcome of diffing a local array against a remote one.
///
/// All three lists are sorted by id so that the reconciler's fetch
/// batches are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayDiff {
    /// Ids present remotely but not locally, with the remote version.
    pub added: VersionArray,
    /// Ids present on both sides with differing versions, remote version.
    pub updated: VersionArray,
    /// Ids present locally but not remotely.
    pub removed: Vec<String>,
}

impl ArrayDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Ids that have to be fetched from the remote (added ∪ updated).
    pub fn fetch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .added
            .iter()
            .chain(self.updated.iter())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Canonical hash over a version array: entries sorted by id, each
/// serialized as `id_bytes || 0x00 || version_be_u64`.
pub fn result_hash(array: &VersionArray) -> String {
    let mut sorted: Vec<&(String, u64)> = array.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (id, version) in sorted {
        hasher.update(id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&version.to_be_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Hash of the empty array. Every freshly registered view over an empty
/// table reports this value, independent of when it was registered.
pub fn empty_hash() -> String {
    result_hash(&Vec::new())
}

/// Diff `local` against `remote`.
///
/// `added` and `updated` carry the remote version (the authoritative
/// one); `removed` lists local ids the remote no longer knows about.
pub fn diff(local: &VersionArray, remote: &VersionArray) -> ArrayDiff {
    use std::collections::HashMap;

    let local_map: HashMap<&str, u64> =
        local.iter().map(|(id, v)| (id.as_str(), *v)).collect();
    let remote_map: HashMap<&str, u64> =
        remote.iter().map(|(id, v)| (id.as_str(), *v)).collect();

    let mut out = ArrayDiff::default();

    for (id, version) in remote {
        match local_map.get(id.as_str()) {
            None => out.added.push((id.clone(), *version)),
            Some(local_version) if local_version != version => {
                out.updated.push((id.clone(), *version));
            }
            Some(_) => {}
        }
    }

    for (id, _) in local {
        if !remote_map.contains_key(id.as_str()) {
            out.removed.push(id.clone());
        }
    }

    out.added.sort_by(|a, b| a.0.cmp(&b.0));
    out.updated.sort_by(|a, b| a.0.cmp(&b.0));
    out.removed.sort_unstable();
    out
}
