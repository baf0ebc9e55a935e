use super::Operator;
use crate::engine::types::Path;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderSpec {
    pub field: Path,
    /// `ASC` or `DESC`, compared case-insensitively.
    pub direction: String,
}

impl OrderSpec {
    pub fn is_descending(&self) -> bool {
        self.direction.eq_ignore_ascii_case("DESC")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Projection {
    /// Carry the whole row.
    All,
    Field {
        name: Path,
    },
    /// Correlated subquery embedded in the projection list. `first`
    /// corresponds to a trailing `[0]`: project the first matching
    /// child instead of the list.
    Subquery {
        alias: String,
        #[serde(default)]
        first: bool,
        plan: Box<Operator>,
    },
}
