use thiserror::Error;

/// Failures surfaced by the stream processor.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Query rejected by the parser; fatal for the registration.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Runtime evaluation failure; the affected view keeps its previous
    /// state and is marked degraded.
    #[error("evaluation failed: {0}")]
    Eval(String),

    /// Underlying storage failure, propagated to the caller.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A view id was re-registered with a different query or params.
    #[error("view {0} already registered with a different query")]
    ViewConflict(String),

    /// Snapshot bytes could not be decoded; the processor starts empty.
    #[error("snapshot corrupted: {0}")]
    Corruption(String),
}
