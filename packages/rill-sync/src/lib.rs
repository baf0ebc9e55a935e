//! Sync reconciler for the rill stream processor: a durable up-queue
//! of local mutations, a down-queue of remote view notifications, and
//! the convergence loop that reconciles each view with the remote
//! replica.

pub mod client;
pub mod config;
pub mod downloader;
pub mod error;
pub mod flatten;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod router;
pub mod saver;
pub mod uploader;

pub use client::SyncClient;
pub use config::{load_or_create_client_id, Config, StoreKind};
pub use downloader::Downloader;
pub use error::SyncError;
pub use flatten::{flatten_records, LinkSchema};
pub use queue::UpQueue;
pub use reconcile::{converge, ArraySyncer, ReconcileLimits, ReconcileOutcome};
pub use remote::{Disconnected, Remote};
pub use router::{Router, RouterEvent};
pub use saver::BackgroundSaver;
pub use uploader::{RetryPolicy, Uploader};

/// Wall clock in epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
