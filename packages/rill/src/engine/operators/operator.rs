use super::predicate::Predicate;
use super::projection::{OrderSpec, Projection};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operator {
    Scan {
        table: String,
    },
    Filter {
        input: Box<Operator>,
        predicate: Predicate,
    },
    Project {
        input: Box<Operator>,
        projections: Vec<Projection>,
    },
    Limit {
        input: Box<Operator>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        order_by: Option<Vec<OrderSpec>>,
    },
}

impl Operator {
    /// All tables this plan reads, including subquery targets.
    /// Sorted and deduplicated; drives the dependency index fan-out.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables.sort_unstable();
        tables.dedup();
        tables
    }

    fn collect_tables(&self, out: &mut Vec<String>) {
        match self {
            Operator::Scan { table } => out.push(table.clone()),
            Operator::Filter { input, .. } | Operator::Limit { input, .. } => {
                input.collect_tables(out)
            }
            Operator::Project { input, projections } => {
                input.collect_tables(out);
                for p in projections {
                    if let Projection::Subquery { plan, .. } = p {
                        plan.collect_tables(out);
                    }
                }
            }
        }
    }

    /// The root table of the plan (the leftmost scan).
    pub fn primary_table(&self) -> &str {
        match self {
            Operator::Scan { table } => table,
            Operator::Filter { input, .. }
            | Operator::Project { input, .. }
            | Operator::Limit { input, .. } => input.primary_table(),
        }
    }

}
