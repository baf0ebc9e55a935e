pub mod engine;
pub mod error;
pub mod normalize;
pub mod parser;
pub mod persistence;

// Re-export commonly used types for convenience
pub use engine::eval::ResultRow;
pub use engine::operators::{Operator, OrderSpec, Predicate, Projection};
pub use engine::processor::{Processor, RecordEvent};
pub use engine::store::{Store, Table};
pub use engine::types::{Datum, FastMap, FastSet, Path, RecordKey, VersionMap};
pub use engine::view::{QueryPlan, View};
pub use error::EngineError;
pub use parser::{involved_tables, parse_query};
pub use persistence::{FileKv, KvStore, MemoryKv, SNAPSHOT_KEY};
