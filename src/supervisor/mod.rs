//! Demand-driven reconciliation pipeline.
//!
//! A ticker signals demand, the producer pulls that many messages off the
//! durable queue, and a worker pool runs the reconciliation algorithm over
//! each batch.

pub mod messages;
mod notifier;
mod reconcile;

pub use notifier::NotificationPublisher;
pub use reconcile::{ReconcileExecutor, missing_chunks, reconstruct, validate};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::queue::{Payload, Queue, RECONCILE_PARTITION};
use crate::workers::{Processor, WorkerPool, dispatch};

/// How often the supervisor asks the producer for another message.
pub const DEMAND_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on each blocking queue read issued by the producer.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Workers concurrently executing reconciliation batches.
pub const RECONCILE_WORKERS: usize = 10;

/// Pull-based producer: consumes demand tokens and answers each one with a
/// batch of up to `demand` payloads read from one queue partition. Both the
/// demand and the result channel are bounded to a single slot.
pub struct QueueProducer {
    queue: Arc<dyn Queue>,
    partition: String,
    dequeue_timeout: Duration,
    demand_tx: mpsc::Sender<usize>,
    demand_rx: Option<mpsc::Receiver<usize>>,
}

impl QueueProducer {
    pub fn new(queue: Arc<dyn Queue>, partition: impl Into<String>, dequeue_timeout: Duration) -> Self {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        Self {
            queue,
            partition: partition.into(),
            dequeue_timeout,
            demand_tx,
            demand_rx: Some(demand_rx),
        }
    }

    /// Ask the producer for `count` more payloads. Blocks while a previous
    /// demand token is still unconsumed.
    pub async fn demand(&self, count: usize) {
        let _ = self.demand_tx.send(count).await;
    }

    /// Spawn the produce loop and hand back its result channel. Timed-out
    /// reads are dropped from the batch; a failed read ends the batch early
    /// but leaves the loop running.
    pub fn produce(&mut self, cancel: CancellationToken) -> mpsc::Receiver<Vec<Payload>> {
        let (results_tx, results_rx) = mpsc::channel(1);

        let Some(mut demand_rx) = self.demand_rx.take() else {
            tracing::error!(target: "supervisor", "Produce loop already started");
            return results_rx;
        };

        let queue = self.queue.clone();
        let partition = self.partition.clone();
        let dequeue_timeout = self.dequeue_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    demanded = demand_rx.recv() => {
                        let Some(demanded) = demanded else { return };

                        let mut results = Vec::new();
                        for _ in 0..demanded {
                            match queue.dequeue(&partition, dequeue_timeout).await {
                                Ok(Some(payload)) => results.push(payload),
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::error!(
                                        target: "supervisor",
                                        partition = %partition,
                                        error = ?err,
                                        "Failed to read from queue, ending batch"
                                    );
                                    break;
                                }
                            }
                        }

                        if results_tx.send(results).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        results_rx
    }
}

/// Owns the producer, the worker pool, and the demand ticker for the
/// reconciliation queue. One instance per process.
pub struct ReconciliationSupervisor {
    producer: QueueProducer,
    executor: Arc<ReconcileExecutor>,
    workers: usize,
    demand_interval: Duration,
}

impl ReconciliationSupervisor {
    pub fn new(queue: Arc<dyn Queue>, executor: ReconcileExecutor) -> Self {
        Self {
            producer: QueueProducer::new(queue, RECONCILE_PARTITION, DEQUEUE_TIMEOUT),
            executor: Arc::new(executor),
            workers: RECONCILE_WORKERS,
            demand_interval: DEMAND_INTERVAL,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_demand_interval(mut self, demand_interval: Duration) -> Self {
        self.demand_interval = demand_interval;
        self
    }

    /// Run until cancelled. Single-message failures are logged inside the
    /// workers; nothing here crashes the process.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            target: "supervisor",
            workers = self.workers,
            "Starting reconciliation supervisor"
        );

        let results_rx = self.producer.produce(cancel.clone());

        let processor: Arc<dyn Processor<Vec<Payload>>> = self.executor.clone();
        let mut pool = WorkerPool::new(self.workers, processor);
        let inboxes = pool.start(cancel.clone());
        tokio::spawn(dispatch(cancel.clone(), inboxes, results_rx));

        let mut ticker = tokio::time::interval(self.demand_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "supervisor", "Stopping reconciliation pool");
                    pool.stop().await;
                    return;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = self.producer.demand(1) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SqliteQueue;
    use crate::store::test_store;

    #[tokio::test]
    async fn producer_answers_demand_with_batched_payloads() {
        let (_dir, store) = test_store();
        let queue: Arc<dyn Queue> = Arc::new(
            SqliteQueue::new(store).with_poll_interval(Duration::from_millis(5)),
        );

        queue
            .enqueue("part-a", Payload::new(b"m1".to_vec()))
            .await
            .unwrap();
        queue
            .enqueue("part-a", Payload::new(b"m2".to_vec()))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut producer =
            QueueProducer::new(queue, "part-a", Duration::from_millis(50));
        let mut results = producer.produce(cancel.clone());

        producer.demand(2).await;
        let batch = results.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message, b"m1");
        assert_eq!(batch[1].message, b"m2");

        // An empty partition answers demand with an empty batch.
        producer.demand(1).await;
        let batch = results.recv().await.unwrap();
        assert!(batch.is_empty());

        cancel.cancel();
    }
}
