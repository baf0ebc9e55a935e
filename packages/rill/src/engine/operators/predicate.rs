use crate::engine::types::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter condition. `value` may be a literal or a `{"$param": path}`
/// reference resolved against the bound params (or the correlated
/// parent row for `parent.*` paths).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Predicate {
    Prefix { field: Path, prefix: String },
    Eq { field: Path, value: Value },
    Neq { field: Path, value: Value },
    Gt { field: Path, value: Value },
    Gte { field: Path, value: Value },
    Lt { field: Path, value: Value },
    Lte { field: Path, value: Value },
    And { predicates: Vec<Predicate> },
    Or { predicates: Vec<Predicate> },
}
