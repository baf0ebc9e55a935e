//! Client assembly: the processor behind its lock, the queues, the
//! workers and the router fan-out.

use crate::config::{load_or_create_client_id, Config};
use crate::downloader::Downloader;
use crate::error::SyncError;
use crate::flatten::LinkSchema;
use crate::now_ms;
use crate::queue::UpQueue;
use crate::remote::Remote;
use crate::router::{Router, RouterEvent};
use crate::saver::BackgroundSaver;
use crate::uploader::Uploader;
use rill::normalize::table_of;
use rill::persistence::load_snapshot;
use rill::{EngineError, KvStore, Processor};
use rill_protocol::{DownEvent, Mutation, MutationKind, VersionArray, ViewSpec, ViewUpdate};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::info;

const DOWN_QUEUE_CAPACITY: usize = 64;
const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub struct SyncClient<R: Remote> {
    processor: Arc<RwLock<Processor>>,
    queue: Arc<UpQueue>,
    down_tx: mpsc::Sender<DownEvent>,
    router: Arc<Router>,
    updates_tx: broadcast::Sender<ViewUpdate>,
    connectivity: Arc<Notify>,
    dirty: Arc<Notify>,
    shutdown_handles: Vec<Arc<Notify>>,
    tasks: Vec<JoinHandle<()>>,
    config: Config,
    client_id: String,
    local_only: bool,
    _remote: Arc<R>,
}

impl<R: Remote> SyncClient<R> {
    /// Restore state, wire the router and spawn the workers.
    pub async fn start(
        config: Config,
        kv: Arc<dyn KvStore>,
        remote: R,
        schema: LinkSchema,
    ) -> Result<Self, SyncError> {
        let client_id = load_or_create_client_id(kv.as_ref(), config.client_id.as_deref())?;
        let processor = Arc::new(RwLock::new(load_snapshot(kv.as_ref())));
        let queue = Arc::new(UpQueue::load(kv.clone()));
        let remote = Arc::new(remote);
        let schema = Arc::new(schema);

        let (down_tx, down_rx) = mpsc::channel(DOWN_QUEUE_CAPACITY);
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let connectivity = Arc::new(Notify::new());
        let dirty = Arc::new(Notify::new());

        let mut router = Router::new();
        {
            let updates_tx = updates_tx.clone();
            router.on("processor", "update", move |event| {
                if let RouterEvent::Update(update) = event {
                    // No subscribers is fine.
                    let _ = updates_tx.send(update.clone());
                }
                Ok(())
            });
        }
        {
            let dirty = dirty.clone();
            router.on("mutation", "applied", move |_| {
                dirty.notify_one();
                Ok(())
            });
        }
        {
            let down_tx = down_tx.clone();
            router.on("remote", "live", move |event| {
                if let RouterEvent::Live(live) = event {
                    down_tx
                        .try_send(DownEvent::Sync {
                            view_id: live.view_id.clone(),
                            remote_hash: live.hash.clone(),
                            remote_array: live.records.clone(),
                        })
                        .map_err(|e| anyhow::anyhow!("down queue rejected live event: {}", e))?;
                }
                Ok(())
            });
        }
        let router = Arc::new(router);

        let local_only = config.endpoint.is_none();
        let mut shutdown_handles = Vec::new();
        let mut tasks = Vec::new();

        let saver_shutdown = Arc::new(Notify::new());
        shutdown_handles.push(saver_shutdown.clone());
        let saver = BackgroundSaver::new(
            kv.clone(),
            processor.clone(),
            dirty.clone(),
            saver_shutdown,
            config.snapshot_debounce_ms,
        );
        tasks.push(tokio::spawn(saver.run()));

        if local_only {
            info!(
                client_id = %client_id,
                namespace = %config.namespace,
                database = %config.database,
                "no endpoint configured, running local-only"
            );
        } else {
            info!(
                client_id = %client_id,
                endpoint = config.endpoint.as_deref().unwrap_or_default(),
                namespace = %config.namespace,
                database = %config.database,
                "connecting to remote"
            );
            let uploader_shutdown = Arc::new(Notify::new());
            shutdown_handles.push(uploader_shutdown.clone());
            let uploader = Uploader::new(
                queue.clone(),
                remote.clone(),
                config.retry_policy(),
                config.rpc_timeout,
                connectivity.clone(),
                uploader_shutdown,
            );
            tasks.push(tokio::spawn(uploader.run()));

            let downloader_shutdown = Arc::new(Notify::new());
            shutdown_handles.push(downloader_shutdown.clone());
            let downloader = Downloader::new(
                processor.clone(),
                remote.clone(),
                down_rx,
                queue.watch_empty(),
                router.clone(),
                schema.clone(),
                client_id.clone(),
                config.reconcile_limits(),
                dirty.clone(),
                downloader_shutdown,
            );
            tasks.push(tokio::spawn(downloader.run()));

            // Pump the remote live stream through the router into the
            // down-queue.
            let pump_shutdown = Arc::new(Notify::new());
            shutdown_handles.push(pump_shutdown.clone());
            let mut live_rx = remote.subscribe();
            let live_router = router.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        live = live_rx.recv() => match live {
                            Some(live) => {
                                live_router.dispatch("remote", "live", &RouterEvent::Live(live));
                            }
                            None => break,
                        },
                        _ = pump_shutdown.notified() => break,
                    }
                }
            }));
        }

        Ok(Self {
            processor,
            queue,
            down_tx,
            router,
            updates_tx,
            connectivity,
            dirty,
            shutdown_handles,
            tasks,
            config,
            client_id,
            local_only,
            _remote: remote,
        })
    }

    /// Apply a local write: optimistic ingest, durable enqueue for
    /// upload, fan-out of the resulting view updates.
    pub async fn mutate(
        &self,
        kind: MutationKind,
        record_id: &str,
        data: Option<Value>,
    ) -> Result<Vec<ViewUpdate>, SyncError> {
        let table = table_of(record_id)
            .ok_or_else(|| {
                SyncError::Engine(EngineError::Storage(format!(
                    "record id without table prefix: {}",
                    record_id
                )))
            })?
            .to_string();

        let updates = {
            self.processor
                .write()
                .unwrap()
                .ingest(&table, kind, record_id, data.clone(), true)?
        };

        let mutation = if self.local_only {
            Mutation {
                seq: 0,
                kind,
                id: record_id.to_string(),
                data,
            }
        } else {
            self.queue.push(kind, record_id.to_string(), data).await?
        };

        self.router
            .dispatch("mutation", "applied", &RouterEvent::Mutation(mutation));
        for update in &updates {
            self.router
                .dispatch("processor", "update", &RouterEvent::Update(update.clone()));
        }
        Ok(updates)
    }

    /// Register a view locally and schedule remote registration plus
    /// convergence.
    pub async fn register_view(&self, mut spec: ViewSpec) -> Result<ViewUpdate, SyncError> {
        if spec.ttl_ms == 0 {
            spec.ttl_ms = self.config.ttl_default.as_millis() as u64;
        }

        let update = {
            self.processor
                .write()
                .unwrap()
                .register_view(&spec, now_ms())?
        };
        self.router
            .dispatch("processor", "update", &RouterEvent::Update(update.clone()));
        self.dirty.notify_one();

        if !self.local_only {
            self.down_tx
                .send(DownEvent::Register(spec))
                .await
                .map_err(|_| SyncError::Remote("down queue closed".to_string()))?;
        }
        Ok(update)
    }

    /// Drop a view locally and schedule the remote cleanup.
    pub async fn unregister_view(&self, view_id: &str) -> Result<(), SyncError> {
        self.processor.write().unwrap().unregister_view(view_id);
        self.dirty.notify_one();

        if !self.local_only {
            self.down_tx
                .send(DownEvent::Cleanup {
                    view_id: view_id.to_string(),
                })
                .await
                .map_err(|_| SyncError::Remote("down queue closed".to_string()))?;
        }
        Ok(())
    }

    /// Keep a view alive locally and remotely.
    pub async fn heartbeat(&self, view_id: &str) -> Result<(), SyncError> {
        self.processor.write().unwrap().touch(view_id, now_ms());

        if !self.local_only {
            self.down_tx
                .send(DownEvent::Heartbeat {
                    view_id: view_id.to_string(),
                })
                .await
                .map_err(|_| SyncError::Remote("down queue closed".to_string()))?;
        }
        Ok(())
    }

    /// Drop views whose TTL elapsed without a heartbeat.
    pub fn evict_expired(&self) -> Vec<String> {
        self.processor.write().unwrap().evict_expired(now_ms())
    }

    /// Receive every emitted view update.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates_tx.subscribe()
    }

    /// Signal that connectivity returned; wakes a suspended uploader.
    pub fn connectivity_restored(&self) {
        self.connectivity.notify_one();
    }

    pub fn view_state(&self, view_id: &str) -> Option<(String, VersionArray)> {
        self.processor.read().unwrap().view_state(view_id)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn pending_uploads(&self) -> Arc<UpQueue> {
        self.queue.clone()
    }

    pub fn processor(&self) -> Arc<RwLock<Processor>> {
        self.processor.clone()
    }

    /// Stop the workers; each drains its current item, the saver takes
    /// a final snapshot.
    pub async fn close(self) {
        for handle in &self.shutdown_handles {
            handle.notify_one();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!(client_id = %self.client_id, "sync client closed");
    }
}
