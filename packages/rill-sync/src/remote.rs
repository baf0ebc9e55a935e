//! The remote replica surface.
//!
//! The reconciler is generic over this trait; concrete transports are
//! chosen at construction and held as owned values. Tests plug in an
//! in-memory mock with fault injection.

use crate::error::SyncError;
use rill_protocol::{LiveUpdate, Mutation, RemoteRecord, RemoteViewState, ViewSpec};
use std::future::Future;
use tokio::sync::mpsc;

pub trait Remote: Send + Sync + 'static {
    /// Register (or refresh) a view on the remote and receive its
    /// authoritative state.
    fn register_view(
        &self,
        spec: &ViewSpec,
        client_id: &str,
        now_ms: u64,
    ) -> impl Future<Output = Result<RemoteViewState, SyncError>> + Send;

    /// Best-effort liveness refresh.
    fn heartbeat(&self, view_id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Delete the remote's view record.
    fn delete_view(&self, view_id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Fetch records by canonical id in one round trip.
    fn select_by_ids(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<RemoteRecord>, SyncError>> + Send;

    /// Apply one local mutation remotely. Completion is the
    /// acknowledgement that removes it from the up-queue.
    fn mutate(&self, mutation: &Mutation) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Live stream of view notifications scoped to this client.
    fn subscribe(&self) -> mpsc::Receiver<LiveUpdate>;
}

/// Placeholder backend for local-only operation (`endpoint` absent).
/// The workers that would call it are never spawned; the stream ends
/// immediately.
pub struct Disconnected;

impl Remote for Disconnected {
    async fn register_view(
        &self,
        _spec: &ViewSpec,
        _client_id: &str,
        _now_ms: u64,
    ) -> Result<RemoteViewState, SyncError> {
        Err(SyncError::Remote("running local-only".to_string()))
    }

    async fn heartbeat(&self, _view_id: &str) -> Result<(), SyncError> {
        Err(SyncError::Remote("running local-only".to_string()))
    }

    async fn delete_view(&self, _view_id: &str) -> Result<(), SyncError> {
        Err(SyncError::Remote("running local-only".to_string()))
    }

    async fn select_by_ids(&self, _ids: &[String]) -> Result<Vec<RemoteRecord>, SyncError> {
        Err(SyncError::Remote("running local-only".to_string()))
    }

    async fn mutate(&self, _mutation: &Mutation) -> Result<(), SyncError> {
        Err(SyncError::Remote("running local-only".to_string()))
    }

    fn subscribe(&self) -> mpsc::Receiver<LiveUpdate> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}
