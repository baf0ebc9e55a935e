//! The download worker: drains the down-queue of remote-originated
//! events, yielding to pending uploads.

use crate::error::SyncError;
use crate::flatten::LinkSchema;
use crate::now_ms;
use crate::reconcile::{converge, ReconcileLimits};
use crate::remote::Remote;
use crate::router::{Router, RouterEvent};
use rill::{EngineError, Processor};
use rill_protocol::{DownEvent, VersionArray, ViewUpdate};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

pub struct Downloader<R: Remote> {
    processor: Arc<RwLock<Processor>>,
    remote: Arc<R>,
    events: mpsc::Receiver<DownEvent>,
    up_empty: watch::Receiver<bool>,
    router: Arc<Router>,
    schema: Arc<LinkSchema>,
    client_id: String,
    limits: ReconcileLimits,
    dirty: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl<R: Remote> Downloader<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processor: Arc<RwLock<Processor>>,
        remote: Arc<R>,
        events: mpsc::Receiver<DownEvent>,
        up_empty: watch::Receiver<bool>,
        router: Arc<Router>,
        schema: Arc<LinkSchema>,
        client_id: String,
        limits: ReconcileLimits,
        dirty: Arc<Notify>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            processor,
            remote,
            events,
            up_empty,
            router,
            schema,
            client_id,
            limits,
            dirty,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("downloader started");
        loop {
            let event = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = self.shutdown.notified() => break,
            };
            // Up-before-down: sync decisions must be made against a
            // remote that has seen every pending local mutation.
            if !self.wait_up_drained().await {
                break;
            }
            if let Err(e) = self.handle(event).await {
                warn!(error = %e, "down event failed");
            }
        }
        info!("downloader stopped");
    }

    /// Block until the up-queue is empty. Returns false on shutdown.
    async fn wait_up_drained(&mut self) -> bool {
        loop {
            if *self.up_empty.borrow() {
                return true;
            }
            tokio::select! {
                changed = self.up_empty.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = self.shutdown.notified() => return false,
            }
        }
    }

    async fn handle(&self, event: DownEvent) -> Result<(), SyncError> {
        match event {
            DownEvent::Register(spec) => {
                let now = now_ms();
                // Ensure the view exists locally; the client already
                // emitted the initial update at local registration.
                let registered = {
                    self.processor.write().unwrap().register_view(&spec, now)
                };
                if let Err(e) = registered {
                    match e {
                        EngineError::ViewConflict(_) => {
                            warn!(view_id = %spec.id, error = %e, "keeping existing view");
                        }
                        other => return Err(other.into()),
                    }
                }
                let state = self.register_remote(&spec, now).await?;
                self.converge_view(&spec.id, &state.hash, state.records)
                    .await
            }

            DownEvent::Sync {
                view_id,
                remote_hash,
                remote_array,
            } => self.converge_view(&view_id, &remote_hash, remote_array).await,

            DownEvent::Heartbeat { view_id } => {
                let now = now_ms();
                let degraded = {
                    let mut proc = self.processor.write().unwrap();
                    proc.touch(&view_id, now);
                    proc.view(&view_id).map(|v| v.degraded).unwrap_or(false)
                };
                // Purely best-effort on the remote side.
                if let Err(e) = self.remote.heartbeat(&view_id).await {
                    debug!(view_id = %view_id, error = %e, "remote heartbeat failed");
                }
                if degraded {
                    // Re-register so the remote's snapshot can drive
                    // the view back to health.
                    let spec = self.processor.read().unwrap().view_spec(&view_id);
                    if let Some(spec) = spec {
                        let state = self.register_remote(&spec, now).await?;
                        self.converge_view(&view_id, &state.hash, state.records)
                            .await?;
                    }
                }
                Ok(())
            }

            DownEvent::Cleanup { view_id } => {
                // Local state is cleared by the caller separately.
                self.remote.delete_view(&view_id).await
            }
        }
    }

    async fn register_remote(
        &self,
        spec: &rill_protocol::ViewSpec,
        now: u64,
    ) -> Result<rill_protocol::RemoteViewState, SyncError> {
        match tokio::time::timeout(
            self.limits.rpc_timeout,
            self.remote.register_view(spec, &self.client_id, now),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Remote(format!(
                "register timed out after {:?}",
                self.limits.rpc_timeout
            ))),
        }
    }

    async fn converge_view(
        &self,
        view_id: &str,
        remote_hash: &str,
        remote_array: VersionArray,
    ) -> Result<(), SyncError> {
        match converge(
            &self.processor,
            self.remote.as_ref(),
            &self.schema,
            view_id,
            remote_hash,
            remote_array,
            self.limits,
        )
        .await
        {
            Ok(outcome) => {
                if !outcome.updates.is_empty() {
                    self.dirty.notify_one();
                }
                for update in outcome.updates {
                    self.emit(update);
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, SyncError::Protocol(_)) {
                    self.processor.write().unwrap().mark_degraded(view_id);
                }
                Err(e)
            }
        }
    }

    fn emit(&self, update: ViewUpdate) {
        self.router
            .dispatch("processor", "update", &RouterEvent::Update(update));
    }
}
