pub mod path;
pub mod value;

pub use path::Path;
pub use value::{Datum, FastMap, FastSet, RecordKey};

/// Per-view map from record id to its opaque version counter.
pub type VersionMap = FastMap<RecordKey, u64>;
