//! Dependency index: which views read which tables.
//!
//! The reverse map is maintained eagerly so that it is the exact
//! inverse of the forward map after every operation.

use crate::engine::types::{FastMap, FastSet};

#[derive(Debug, Default, Clone)]
pub struct DependencyIndex {
    /// view id -> tables it reads
    forward: FastMap<String, Vec<String>>,
    /// table -> view ids reading it
    reverse: FastMap<String, FastSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering a view replaces its table set.
    pub fn register(&mut self, view_id: &str, tables: Vec<String>) {
        self.unregister(view_id);
        for table in &tables {
            self.reverse
                .entry(table.clone())
                .or_default()
                .insert(view_id.to_string());
        }
        self.forward.insert(view_id.to_string(), tables);
    }

    /// Removes the view and every back-reference to it.
    pub fn unregister(&mut self, view_id: &str) {
        if let Some(tables) = self.forward.remove(view_id) {
            for table in tables {
                if let Some(views) = self.reverse.get_mut(&table) {
                    views.remove(view_id);
                    if views.is_empty() {
                        self.reverse.remove(&table);
                    }
                }
            }
        }
    }

    /// Views that must be recomputed after a write to `table`, in
    /// deterministic (sorted) order.
    pub fn affected_by(&self, table: &str) -> Vec<String> {
        let mut views: Vec<String> = self
            .reverse
            .get(table)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        views.sort_unstable();
        views
    }

    pub fn tables_of(&self, view_id: &str) -> Option<&[String]> {
        self.forward.get(view_id).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_is_exact_inverse() {
        let mut idx = DependencyIndex::new();
        idx.register("v1", vec!["user".into(), "post".into()]);
        idx.register("v2", vec!["post".into()]);

        assert_eq!(idx.affected_by("user"), vec!["v1".to_string()]);
        assert_eq!(
            idx.affected_by("post"),
            vec!["v1".to_string(), "v2".to_string()]
        );

        idx.unregister("v1");
        assert!(idx.affected_by("user").is_empty());
        assert_eq!(idx.affected_by("post"), vec!["v2".to_string()]);
    }

    #[test]
    fn register_is_idempotent() {
        let mut idx = DependencyIndex::new();
        idx.register("v1", vec!["user".into()]);
        idx.register("v1", vec!["user".into()]);
        assert_eq!(idx.affected_by("user"), vec!["v1".to_string()]);

        // Re-registration with a different table set drops the old refs.
        idx.register("v1", vec!["post".into()]);
        assert!(idx.affected_by("user").is_empty());
        assert_eq!(idx.affected_by("post"), vec!["v1".to_string()]);
    }
}
