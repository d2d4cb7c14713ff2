//! Partition-addressable durable FIFO queue.
//!
//! Two logical queues ride on the same store: the reconciliation queue
//! (single partition) and the per-user notification partitions. Delivery is
//! at-least-once; every reader is idempotent.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::store::SyncStore;

/// Partition consumed by the reconciliation supervisor.
pub const RECONCILE_PARTITION: &str = "metadata_update_file";

/// Partition carrying update notifications for one user's devices.
pub fn notify_partition(user_id: &str) -> String {
    format!("metadata_update_clients_{user_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub message: Vec<u8>,
    pub key: String,
}

impl Payload {
    pub fn new(message: Vec<u8>) -> Self {
        Self {
            message,
            key: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Enqueue failures for a subset of a batch; callers decide whether to
/// retry the contained payloads.
#[derive(Debug, Error)]
#[error("partial_failure: {} payload(s) not enqueued", failed.len())]
pub struct PartialError {
    pub failed: Vec<Payload>,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, partition: &str, payload: Payload) -> Result<(), QueueError>;

    /// Blocking pop bounded by `timeout`; returns `None` on timeout, not an
    /// error.
    async fn dequeue(
        &self,
        partition: &str,
        timeout: Duration,
    ) -> Result<Option<Payload>, QueueError>;
}

/// Durable queue riding on the SQLite store's `queue_messages` table.
/// Blocking reads are emulated with a bounded poll loop.
#[derive(Clone)]
pub struct SqliteQueue {
    store: SyncStore,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn new(store: SyncStore) -> Self {
        Self {
            store,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    async fn enqueue(&self, partition: &str, payload: Payload) -> Result<(), QueueError> {
        tracing::debug!(target: "queue", partition = partition, "Pushing message to queue");
        self.store.push_queue_message(partition, &payload.message)?;
        Ok(())
    }

    async fn dequeue(
        &self,
        partition: &str,
        timeout: Duration,
    ) -> Result<Option<Payload>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(message) = self.store.pop_queue_message(partition)? {
                return Ok(Some(Payload {
                    message,
                    key: partition.to_string(),
                }));
            }

            if Instant::now() + self.poll_interval > deadline {
                return Ok(None);
            }

            sleep(self.poll_interval).await;
        }
    }
}
