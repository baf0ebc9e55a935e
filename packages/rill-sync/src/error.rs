use rill::EngineError;
use thiserror::Error;

/// Failures surfaced by the sync reconciler.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient network or remote failure; retried with backoff.
    #[error("remote unavailable: {0}")]
    Remote(String),

    /// Credentials rejected; never retried, uploads pause.
    #[error("authentication rejected by the remote")]
    Auth,

    /// Remote response inconsistent with the version-array invariants.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Invalid or unrecognized configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Remote(_))
    }
}
