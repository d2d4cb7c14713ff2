use std::sync::Arc;

use crate::queue::{PartialError, Payload, Queue, notify_partition};
use crate::supervisor::messages::{NotificationMessage, encode_frame};

/// Fans completed-reconciliation events out onto the per-user notification
/// partitions consumed by the SSE sync broker.
#[derive(Clone)]
pub struct NotificationPublisher {
    queue: Arc<dyn Queue>,
}

impl NotificationPublisher {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self { queue }
    }

    /// Enqueue one payload per event. Events that fail to enqueue are
    /// returned inside the `PartialError`; the caller decides whether to
    /// retry them.
    pub async fn notify(&self, events: &[NotificationMessage]) -> Result<(), PartialError> {
        let mut failed = Vec::new();

        for event in events {
            let frame = match encode_frame(event) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(
                        target: "supervisor",
                        file_id = %event.file_id,
                        error = ?err,
                        "Failed to encode notification event"
                    );
                    continue;
                }
            };

            let payload = Payload::new(frame);
            let partition = notify_partition(&event.user_id);
            if let Err(err) = self.queue.enqueue(&partition, payload.clone()).await {
                tracing::error!(
                    target: "supervisor",
                    partition = %partition,
                    error = ?err,
                    "Failed to enqueue notification"
                );
                failed.push(payload);
            }
        }

        if failed.is_empty() {
            tracing::debug!(
                target: "supervisor",
                events = events.len(),
                "Enqueued all notification events"
            );
            return Ok(());
        }

        Err(PartialError { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SqliteQueue;
    use crate::store::test_store;
    use crate::supervisor::messages::decode_frame;
    use std::time::Duration;

    #[tokio::test]
    async fn notifications_land_on_the_users_partition() {
        let (_dir, store) = test_store();
        let queue: Arc<dyn Queue> = Arc::new(
            SqliteQueue::new(store).with_poll_interval(Duration::from_millis(5)),
        );
        let publisher = NotificationPublisher::new(queue.clone());

        let events = vec![
            NotificationMessage {
                file_id: "f1".to_string(),
                user_id: "user-a".to_string(),
                device_id: None,
            },
            NotificationMessage {
                file_id: "f2".to_string(),
                user_id: "user-b".to_string(),
                device_id: Some("device-1".to_string()),
            },
        ];

        publisher.notify(&events).await.unwrap();

        let payload = queue
            .dequeue(&notify_partition("user-a"), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let decoded: NotificationMessage = decode_frame(&payload.message).unwrap();
        assert_eq!(decoded.file_id, "f1");

        let payload = queue
            .dequeue(&notify_partition("user-b"), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let decoded: NotificationMessage = decode_frame(&payload.message).unwrap();
        assert_eq!(decoded.file_id, "f2");
        assert_eq!(decoded.device_id.as_deref(), Some("device-1"));
    }
}
