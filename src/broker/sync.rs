//! Bridges the per-user notification partitions to the subscriber registry.
//!
//! Each connected SSE handler ticks demand into the broker; the broker
//! forwards it to a demand-driven producer whose batches are decoded by a
//! single worker and published to the user's registered device topics.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::SubscriberRegistry;
use crate::queue::{Payload, Queue, notify_partition};
use crate::supervisor::messages::{NotificationMessage, decode_frame};
use crate::workers::{Processor, WorkerPool, dispatch};

/// Upper bound on each notification-partition read.
const NOTIFY_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// A request for `count` notifications addressed to one user's partition.
#[derive(Debug, Clone)]
pub struct Demand {
    pub count: usize,
    pub user_id: String,
}

/// Demand-driven consumer over the per-user notification partitions.
pub struct NotifyProducer {
    queue: Arc<dyn Queue>,
    dequeue_timeout: Duration,
    demand_tx: mpsc::Sender<Demand>,
    demand_rx: Option<mpsc::Receiver<Demand>>,
}

impl NotifyProducer {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        Self {
            queue,
            dequeue_timeout: NOTIFY_DEQUEUE_TIMEOUT,
            demand_tx,
            demand_rx: Some(demand_rx),
        }
    }

    pub fn with_dequeue_timeout(mut self, dequeue_timeout: Duration) -> Self {
        self.dequeue_timeout = dequeue_timeout;
        self
    }

    fn demand_sender(&self) -> mpsc::Sender<Demand> {
        self.demand_tx.clone()
    }

    /// Spawn the produce loop; each demand token answers with a batch read
    /// from the demanding user's partition.
    fn produce(&mut self, cancel: CancellationToken) -> mpsc::Receiver<Vec<Payload>> {
        let (results_tx, results_rx) = mpsc::channel(1);

        let Some(mut demand_rx) = self.demand_rx.take() else {
            tracing::error!(target: "broker", "Notify produce loop already started");
            return results_rx;
        };

        let queue = self.queue.clone();
        let dequeue_timeout = self.dequeue_timeout;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    demand = demand_rx.recv() => {
                        let Some(demand) = demand else { return };
                        let partition = notify_partition(&demand.user_id);

                        let mut results = Vec::new();
                        for _ in 0..demand.count {
                            match queue.dequeue(&partition, dequeue_timeout).await {
                                Ok(Some(payload)) => results.push(payload),
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::error!(
                                        target: "broker",
                                        partition = %partition,
                                        error = ?err,
                                        "Failed to read notification, ending batch"
                                    );
                                    break;
                                }
                            }
                        }

                        if results.is_empty() {
                            continue;
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

/// Decodes notification payloads and publishes them to every device topic
/// the owning user has registered.
pub struct SseConsumer {
    registry: Arc<SubscriberRegistry>,
}

impl SseConsumer {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Processor<Vec<Payload>> for SseConsumer {
    async fn process(&self, payloads: Vec<Payload>) -> anyhow::Result<()> {
        for payload in payloads {
            let event: NotificationMessage = decode_frame(&payload.message)?;
            let content = format!("fileID:{}", event.file_id);

            tracing::debug!(
                target: "broker",
                user_id = %event.user_id,
                file_id = %event.file_id,
                "Publishing update to user's devices"
            );
            self.registry.publish_user(&event.user_id, content).await;
        }

        Ok(())
    }
}

/// Demand front-door shared by all SSE connections of a process.
pub struct StreamSyncBroker {
    name: String,
    demand_tx: mpsc::Sender<Demand>,
    demand_rx: Option<mpsc::Receiver<Demand>>,
    producer: Option<NotifyProducer>,
    consumer: Option<SseConsumer>,
}

impl StreamSyncBroker {
    pub fn new(name: impl Into<String>, producer: NotifyProducer, consumer: SseConsumer) -> Self {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        Self {
            name: name.into(),
            demand_tx,
            demand_rx: Some(demand_rx),
            producer: Some(producer),
            consumer: Some(consumer),
        }
    }

    /// Wire producer, one-worker pool, and the demand-forwarding loop.
    pub fn start(&mut self, cancel: CancellationToken) {
        let (Some(mut producer), Some(consumer), Some(mut demand_rx)) = (
            self.producer.take(),
            self.consumer.take(),
            self.demand_rx.take(),
        ) else {
            tracing::error!(target: "broker", name = %self.name, "Sync broker already started");
            return;
        };

        let results_rx = producer.produce(cancel.clone());
        let producer_demand = producer.demand_sender();

        let processor: Arc<dyn Processor<Vec<Payload>>> = Arc::new(consumer);
        let mut pool = WorkerPool::new(1, processor);
        let inboxes = pool.start(cancel.clone());
        tokio::spawn(dispatch(cancel.clone(), inboxes, results_rx));

        let name = self.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(target: "broker", name = %name, "Stopping sync broker pool");
                        pool.stop().await;
                        return;
                    }
                    demand = demand_rx.recv() => {
                        let Some(demand) = demand else { return };
                        if producer_demand.send(demand).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Called by SSE handlers on every tick of a connected device.
    pub async fn handle_demand(&self, demand: Demand) {
        let _ = self.demand_tx.send(demand).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topic_key;
    use crate::queue::SqliteQueue;
    use crate::store::test_store;
    use crate::supervisor::messages::encode_frame;

    #[tokio::test]
    async fn demanded_notification_reaches_both_devices() {
        let (_dir, store) = test_store();
        let queue: Arc<dyn Queue> = Arc::new(
            SqliteQueue::new(store).with_poll_interval(Duration::from_millis(5)),
        );

        let cancel = CancellationToken::new();
        let mut registry = SubscriberRegistry::new("test_file_events");
        registry.start(cancel.clone());
        let registry = Arc::new(registry);

        let mut d1 = registry.subscribe(&topic_key("user-1", "d1")).await;
        let mut d2 = registry.subscribe(&topic_key("user-1", "d2")).await;

        let event = NotificationMessage {
            file_id: "f2".to_string(),
            user_id: "user-1".to_string(),
            device_id: Some("d1".to_string()),
        };
        queue
            .enqueue(
                &notify_partition("user-1"),
                Payload::new(encode_frame(&event).unwrap()),
            )
            .await
            .unwrap();

        let producer = NotifyProducer::new(queue.clone())
            .with_dequeue_timeout(Duration::from_millis(100));
        let consumer = SseConsumer::new(registry.clone());
        let mut broker = StreamSyncBroker::new("update_syncer", producer, consumer);
        broker.start(cancel.clone());

        broker
            .handle_demand(Demand {
                count: 1,
                user_id: "user-1".to_string(),
            })
            .await;

        let m1 = tokio::time::timeout(Duration::from_secs(2), d1.recv())
            .await
            .unwrap()
            .unwrap();
        let m2 = tokio::time::timeout(Duration::from_secs(2), d2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m1.content, "fileID:f2");
        assert_eq!(m2.content, "fileID:f2");

        cancel.cancel();
    }
}
