//! The durable up-queue of pending local mutations.
//!
//! FIFO in enqueue order, persisted through the key-value store on
//! every push and acknowledgement so that unacknowledged work survives
//! restarts. The emptiness watch is what the downloader's priority
//! gate observes.

use crate::error::SyncError;
use rill::{EngineError, KvStore};
use rill_protocol::{Mutation, MutationKind};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, warn};

pub const UP_QUEUE_KEY: &str = "rill/sync/up-queue";

pub struct UpQueue {
    kv: Arc<dyn KvStore>,
    items: Mutex<VecDeque<Mutation>>,
    notify: Notify,
    empty_tx: watch::Sender<bool>,
    next_seq: AtomicU64,
}

impl UpQueue {
    /// Restore pending mutations from the store; unreadable state
    /// starts an empty queue.
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let items: VecDeque<Mutation> = match kv.get(UP_QUEUE_KEY) {
            Ok(Some(bytes)) => match cbor4ii::serde::from_slice(&bytes) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "up-queue state corrupted, starting empty");
                    VecDeque::new()
                }
            },
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "up-queue state unreadable, starting empty");
                VecDeque::new()
            }
        };

        let next_seq = items.iter().map(|m| m.seq + 1).max().unwrap_or(1);
        let (empty_tx, _) = watch::channel(items.is_empty());

        Self {
            kv,
            items: Mutex::new(items),
            notify: Notify::new(),
            empty_tx,
            next_seq: AtomicU64::new(next_seq),
        }
    }

    /// Enqueue a mutation; durable once this returns.
    pub async fn push(
        &self,
        kind: MutationKind,
        id: String,
        data: Option<Value>,
    ) -> Result<Mutation, SyncError> {
        let mutation = Mutation {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            kind,
            id,
            data,
        };

        {
            let mut items = self.items.lock().await;
            items.push_back(mutation.clone());
            self.persist(&items)?;
            let _ = self.empty_tx.send(false);
        }
        self.notify.notify_one();
        debug!(seq = mutation.seq, "mutation enqueued");
        Ok(mutation)
    }

    /// The mutation at the head, if any. The head stays in place until
    /// acknowledged.
    pub async fn head(&self) -> Option<Mutation> {
        self.items.lock().await.front().cloned()
    }

    /// Remove the head after remote acknowledgement.
    pub async fn ack(&self, seq: u64) -> Result<(), SyncError> {
        let mut items = self.items.lock().await;
        match items.front() {
            Some(head) if head.seq == seq => {
                items.pop_front();
            }
            other => {
                warn!(
                    acked = seq,
                    head = other.map(|m| m.seq),
                    "acknowledgement does not match queue head"
                );
            }
        }
        self.persist(&items)?;
        if items.is_empty() {
            let _ = self.empty_tx.send(true);
        }
        Ok(())
    }

    /// Resolves once a new item was pushed. A push that happened while
    /// nobody was waiting is not lost.
    pub async fn wait_for_item(&self) {
        self.notify.notified().await;
    }

    /// Watch for the queue becoming empty (the up-before-down gate).
    pub fn watch_empty(&self) -> watch::Receiver<bool> {
        self.empty_tx.subscribe()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    fn persist(&self, items: &VecDeque<Mutation>) -> Result<(), SyncError> {
        let bytes = cbor4ii::serde::to_vec(Vec::new(), items)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        self.kv.set(UP_QUEUE_KEY, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill::MemoryKv;

    #[tokio::test]
    async fn fifo_and_ack() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = UpQueue::load(kv);

        let a = queue
            .push(MutationKind::Create, "user:1".into(), Some(serde_json::json!({"x": 1})))
            .await
            .unwrap();
        let b = queue
            .push(MutationKind::Delete, "user:2".into(), None)
            .await
            .unwrap();
        assert!(a.seq < b.seq);

        assert_eq!(queue.head().await.unwrap().seq, a.seq);
        queue.ack(a.seq).await.unwrap();
        assert_eq!(queue.head().await.unwrap().seq, b.seq);
        queue.ack(b.seq).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn pending_items_survive_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

        {
            let queue = UpQueue::load(kv.clone());
            queue
                .push(MutationKind::Create, "user:1".into(), Some(serde_json::json!({})))
                .await
                .unwrap();
            let acked = queue
                .push(MutationKind::Create, "user:2".into(), Some(serde_json::json!({})))
                .await
                .unwrap();
            // Acking out of order is refused; the head survives.
            queue.ack(acked.seq).await.unwrap();
        }

        let queue = UpQueue::load(kv);
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.head().await.unwrap().id, "user:1");

        // Sequence numbers continue past the restored ones.
        let next = queue
            .push(MutationKind::Delete, "user:3".into(), None)
            .await
            .unwrap();
        assert!(next.seq > queue.head().await.unwrap().seq);
    }

    #[tokio::test]
    async fn empty_watch_tracks_the_queue() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = UpQueue::load(kv);
        let rx = queue.watch_empty();
        assert!(*rx.borrow());

        let m = queue
            .push(MutationKind::Create, "t:1".into(), Some(serde_json::json!({})))
            .await
            .unwrap();
        assert!(!*rx.borrow());

        queue.ack(m.seq).await.unwrap();
        assert!(*rx.borrow());
    }
}
