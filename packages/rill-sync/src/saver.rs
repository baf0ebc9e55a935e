//! Debounced background snapshots of the processor state.

use rill::persistence::save_snapshot;
use rill::{KvStore, Processor};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub struct BackgroundSaver {
    kv: Arc<dyn KvStore>,
    processor: Arc<RwLock<Processor>>,
    dirty: Arc<Notify>,
    shutdown: Arc<Notify>,
    debounce: Duration,
}

impl BackgroundSaver {
    pub fn new(
        kv: Arc<dyn KvStore>,
        processor: Arc<RwLock<Processor>>,
        dirty: Arc<Notify>,
        shutdown: Arc<Notify>,
        debounce_ms: u64,
    ) -> Self {
        Self {
            kv,
            processor,
            dirty,
            shutdown,
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    pub async fn run(self) {
        info!("background saver started");
        loop {
            tokio::select! {
                _ = self.dirty.notified() => {
                    // Debounce: coalesce bursts of mutations into one
                    // snapshot after quiescence.
                    debug!(debounce_ms = self.debounce.as_millis() as u64, "state dirty, waiting");
                    tokio::select! {
                        _ = sleep(self.debounce) => self.save_now(),
                        _ = self.shutdown.notified() => {
                            info!("shutdown during debounce, performing final snapshot");
                            self.save_now();
                            break;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received, performing final snapshot");
                    self.save_now();
                    break;
                }
            }
        }
        info!("background saver stopped");
    }

    fn save_now(&self) {
        let processor = self.processor.read().unwrap();
        if let Err(e) = save_snapshot(self.kv.as_ref(), &processor) {
            error!(error = %e, "background snapshot failed");
        }
    }
}
