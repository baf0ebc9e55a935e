//! The upload worker: drains the up-queue in strict enqueue order.

use crate::error::SyncError;
use crate::queue::UpQueue;
use crate::remote::Remote;
use rill_protocol::Mutation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Exponential backoff for transient upload failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base: Duration::from_millis(10),
            cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2ⁿ⁻¹,
    /// capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

pub struct Uploader<R: Remote> {
    queue: Arc<UpQueue>,
    remote: Arc<R>,
    retry: RetryPolicy,
    rpc_timeout: Duration,
    /// Wakes a suspended uploader after retries were exhausted or auth
    /// failed.
    connectivity: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl<R: Remote> Uploader<R> {
    pub fn new(
        queue: Arc<UpQueue>,
        remote: Arc<R>,
        retry: RetryPolicy,
        rpc_timeout: Duration,
        connectivity: Arc<Notify>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            remote,
            retry,
            rpc_timeout,
            connectivity,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!("uploader started");
        loop {
            let Some(mutation) = self.queue.head().await else {
                tokio::select! {
                    _ = self.queue.wait_for_item() => continue,
                    _ = self.shutdown.notified() => break,
                }
            };
            if !self.upload_one(&mutation).await {
                break;
            }
        }
        info!("uploader stopped");
    }

    /// Push one mutation until the remote acknowledges it. The item is
    /// removed from the queue only on acknowledgement. Returns false on
    /// shutdown.
    async fn upload_one(&self, mutation: &Mutation) -> bool {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.rpc_timeout, self.remote.mutate(mutation))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Remote(format!(
                    "mutate timed out after {:?}",
                    self.rpc_timeout
                ))),
            };
            match result {
                Ok(()) => {
                    if let Err(e) = self.queue.ack(mutation.seq).await {
                        error!(seq = mutation.seq, error = %e, "failed to persist ack");
                    }
                    debug!(seq = mutation.seq, "mutation acknowledged");
                    return true;
                }
                Err(SyncError::Auth) => {
                    error!(seq = mutation.seq, "credentials rejected, uploads paused");
                    if !self.suspend().await {
                        return false;
                    }
                    attempt = 0;
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            seq = mutation.seq,
                            attempts = attempt,
                            "retries exhausted, uploader suspended until connectivity returns"
                        );
                        if !self.suspend().await {
                            return false;
                        }
                        attempt = 0;
                    } else {
                        let delay = self.retry.delay(attempt);
                        debug!(
                            seq = mutation.seq,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "upload failed, backing off"
                        );
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = self.shutdown.notified() => return false,
                        }
                    }
                }
                Err(e) => {
                    // Non-transient rejection: keep the mutation at the
                    // head, wait for an operator signal.
                    warn!(seq = mutation.seq, error = %e, "upload rejected, uploader suspended");
                    if !self.suspend().await {
                        return false;
                    }
                    attempt = 0;
                }
            }
        }
    }

    /// Park until a connectivity signal. Returns false on shutdown.
    async fn suspend(&self) -> bool {
        tokio::select! {
            _ = self.connectivity.notified() => true,
            _ = self.shutdown.notified() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(1), Duration::from_millis(10));
        assert_eq!(retry.delay(2), Duration::from_millis(20));
        assert_eq!(retry.delay(3), Duration::from_millis(40));
        assert_eq!(retry.delay(12), Duration::from_secs(5));
    }
}
