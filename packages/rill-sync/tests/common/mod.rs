#![allow(dead_code)]

use rill_protocol::{
    empty_hash, result_hash, LiveUpdate, Mutation, RemoteRecord, RemoteViewState, VersionArray,
    ViewSpec,
};
use rill_sync::{Remote, SyncError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Default)]
pub struct MockState {
    /// Records served by select_by_ids, keyed by canonical id.
    pub records: HashMap<String, RemoteRecord>,
    /// View states served by register_view.
    pub views: HashMap<String, RemoteViewState>,
    /// Ordered log of completed remote calls.
    pub log: Vec<String>,
    pub mutate_attempts: u32,
}

struct MockInner {
    state: Mutex<MockState>,
    /// Fail the next N mutate calls with a transient error.
    fail_mutations: AtomicU32,
    /// Reject every mutate with an auth error while set.
    reject_auth: AtomicBool,
    /// The next mutate call blocks until `release` fires.
    stall_next_mutate: AtomicBool,
    release: Notify,
    live_tx: Mutex<Option<mpsc::Sender<LiveUpdate>>>,
}

/// In-memory remote with fault and stall injection. Cheap to clone;
/// clones share state.
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<MockInner>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState::default()),
                fail_mutations: AtomicU32::new(0),
                reject_auth: AtomicBool::new(false),
                stall_next_mutate: AtomicBool::new(false),
                release: Notify::new(),
                live_tx: Mutex::new(None),
            }),
        }
    }

    pub fn put_record(&self, id: &str, data: Value) {
        let table = id.split_once(':').expect("canonical id").0.to_string();
        self.inner.state.lock().unwrap().records.insert(
            id.to_string(),
            RemoteRecord {
                id: id.to_string(),
                table,
                data,
            },
        );
    }

    /// Serve this array (and its hash) on the next register of
    /// `view_id`.
    pub fn set_view_state(&self, view_id: &str, records: VersionArray) {
        let state = RemoteViewState {
            hash: result_hash(&records),
            records,
        };
        self.inner
            .state
            .lock()
            .unwrap()
            .views
            .insert(view_id.to_string(), state);
    }

    pub fn fail_next_mutations(&self, n: u32) {
        self.inner.fail_mutations.store(n, Ordering::SeqCst);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.inner.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn stall_next_mutate(&self) {
        self.inner.stall_next_mutate.store(true, Ordering::SeqCst);
    }

    pub fn release_stalled(&self) {
        self.inner.release.notify_one();
    }

    pub async fn push_live(&self, view_id: &str, records: VersionArray) {
        let tx = self
            .inner
            .live_tx
            .lock()
            .unwrap()
            .clone()
            .expect("nobody subscribed");
        tx.send(LiveUpdate {
            view_id: view_id.to_string(),
            hash: result_hash(&records),
            records,
        })
        .await
        .expect("live channel closed");
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().log.clone()
    }

    pub fn mutate_attempts(&self) -> u32 {
        self.inner.state.lock().unwrap().mutate_attempts
    }

    fn push_log(&self, entry: String) {
        self.inner.state.lock().unwrap().log.push(entry);
    }
}

impl Remote for MockRemote {
    async fn register_view(
        &self,
        spec: &ViewSpec,
        _client_id: &str,
        _now_ms: u64,
    ) -> Result<RemoteViewState, SyncError> {
        self.push_log(format!("register:{}", spec.id));
        let state = self
            .inner
            .state
            .lock()
            .unwrap()
            .views
            .get(&spec.id)
            .cloned()
            .unwrap_or(RemoteViewState {
                hash: empty_hash(),
                records: Vec::new(),
            });
        Ok(state)
    }

    async fn heartbeat(&self, view_id: &str) -> Result<(), SyncError> {
        self.push_log(format!("heartbeat:{}", view_id));
        Ok(())
    }

    async fn delete_view(&self, view_id: &str) -> Result<(), SyncError> {
        self.push_log(format!("delete_view:{}", view_id));
        Ok(())
    }

    async fn select_by_ids(&self, ids: &[String]) -> Result<Vec<RemoteRecord>, SyncError> {
        self.push_log(format!("select:{}", ids.join(",")));
        let state = self.inner.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<(), SyncError> {
        self.inner.state.lock().unwrap().mutate_attempts += 1;

        if self.inner.stall_next_mutate.swap(false, Ordering::SeqCst) {
            self.inner.release.notified().await;
        }
        if self.inner.reject_auth.load(Ordering::SeqCst) {
            return Err(SyncError::Auth);
        }
        if self
            .inner
            .fail_mutations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::Remote("injected failure".to_string()));
        }

        self.push_log(format!("mutate:{}", mutation.seq));
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<LiveUpdate> {
        let (tx, rx) = mpsc::channel(16);
        *self.inner.live_tx.lock().unwrap() = Some(tx);
        rx
    }
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test …`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll until `condition` holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn arr(entries: &[(&str, u64)]) -> VersionArray {
    entries.iter().map(|(id, v)| (id.to_string(), *v)).collect()
}
