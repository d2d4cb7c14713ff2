//! Subscriber registry for SSE delivery.
//!
//! A single event-loop task is the only writer to the topic map; everything
//! else talks to it over bounded command channels. Per-topic ordering is
//! FIFO because that one task performs every send.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Per-subscriber delivery timeout; a slow consumer loses the message
/// rather than stalling the loop indefinitely.
const TOPIC_SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for handing a message or unsubscription to the event loop.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(9);
/// Subscriptions register against an empty command slot almost instantly;
/// anything longer means the loop is gone.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

/// One update event addressed to a `(user, device)` subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    pub user_id: String,
    pub device_id: String,
    pub content: String,
}

impl Message {
    pub fn key(&self) -> String {
        topic_key(&self.user_id, &self.device_id)
    }
}

/// Routing key of one subscriber channel.
pub fn topic_key(user_id: &str, device_id: &str) -> String {
    format!("{user_id}_{device_id}")
}

struct Subscription {
    name: String,
    tx: mpsc::Sender<Message>,
}

struct Unsubscription {
    name: String,
    done: oneshot::Sender<()>,
}

/// Fan a payload out to every device topic registered under one user.
struct UserBroadcast {
    user_id: String,
    content: String,
}

pub struct SubscriberRegistry {
    name: String,
    subscribe_tx: mpsc::Sender<Subscription>,
    unsubscribe_tx: mpsc::Sender<Unsubscription>,
    messages_tx: mpsc::Sender<Message>,
    broadcast_tx: mpsc::Sender<UserBroadcast>,
    count_tx: mpsc::Sender<oneshot::Sender<usize>>,
    receivers: Option<Receivers>,
}

struct Receivers {
    subscribe_rx: mpsc::Receiver<Subscription>,
    unsubscribe_rx: mpsc::Receiver<Unsubscription>,
    messages_rx: mpsc::Receiver<Message>,
    broadcast_rx: mpsc::Receiver<UserBroadcast>,
    count_rx: mpsc::Receiver<oneshot::Sender<usize>>,
}

impl SubscriberRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        let (subscribe_tx, subscribe_rx) = mpsc::channel(1);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(1);
        let (messages_tx, messages_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
        let (count_tx, count_rx) = mpsc::channel(1);

        Self {
            name: name.into(),
            subscribe_tx,
            unsubscribe_tx,
            messages_tx,
            broadcast_tx,
            count_tx,
            receivers: Some(Receivers {
                subscribe_rx,
                unsubscribe_rx,
                messages_rx,
                broadcast_rx,
                count_rx,
            }),
        }
    }

    /// Spawn the event loop. Must be called exactly once before the
    /// registry is shared.
    pub fn start(&mut self, cancel: CancellationToken) {
        let Some(receivers) = self.receivers.take() else {
            tracing::error!(target: "broker", name = %self.name, "Registry already started");
            return;
        };

        let name = self.name.clone();
        tokio::spawn(event_loop(name, receivers, cancel));
    }

    /// Register a subscriber channel under a topic and hand back its
    /// receiving end. The first registration of a name wins; a duplicate's
    /// channel closes immediately.
    pub async fn subscribe(&self, topic: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(1);
        let command = Subscription {
            name: topic.to_string(),
            tx,
        };

        if tokio::time::timeout(SUBSCRIBE_TIMEOUT, self.subscribe_tx.send(command))
            .await
            .is_err()
        {
            tracing::error!(target: "broker", topic = %topic, "Subscribe command timed out");
        }

        rx
    }

    /// Remove a topic and close its channel. Blocks until the event loop
    /// acknowledges so the caller can safely tear down per-request state.
    pub async fn unsubscribe(&self, topic: &str) {
        let (done_tx, done_rx) = oneshot::channel();
        let command = Unsubscription {
            name: topic.to_string(),
            done: done_tx,
        };

        if tokio::time::timeout(COMMAND_TIMEOUT, self.unsubscribe_tx.send(command))
            .await
            .is_err()
        {
            tracing::error!(target: "broker", topic = %topic, "Unsubscribe command timed out");
            return;
        }

        let _ = done_rx.await;
    }

    /// Publish to a single `(user, device)` topic.
    pub async fn send_message(&self, message: Message) {
        if tokio::time::timeout(COMMAND_TIMEOUT, self.messages_tx.send(message))
            .await
            .is_err()
        {
            tracing::warn!(target: "broker", name = %self.name, "Failed to hand message to event loop");
        }
    }

    /// Publish to every device topic currently registered for a user.
    pub async fn publish_user(&self, user_id: &str, content: String) {
        let command = UserBroadcast {
            user_id: user_id.to_string(),
            content,
        };

        if tokio::time::timeout(COMMAND_TIMEOUT, self.broadcast_tx.send(command))
            .await
            .is_err()
        {
            tracing::warn!(target: "broker", user_id = %user_id, "Failed to hand broadcast to event loop");
        }
    }

    /// Number of live topics; used by handlers for diagnostics and by tests
    /// to assert cleanup.
    pub async fn topic_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.count_tx.send(reply_tx).await.is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

async fn event_loop(name: String, mut receivers: Receivers, cancel: CancellationToken) {
    let mut topics: HashMap<String, mpsc::Sender<Message>> = HashMap::new();

    tracing::info!(target: "broker", name = %name, "Subscriber registry started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(target: "broker", name = %name, "Subscriber registry exiting");
                return;
            }
            command = receivers.subscribe_rx.recv() => {
                let Some(command) = command else { return };
                if topics.contains_key(&command.name) {
                    tracing::debug!(target: "broker", topic = %command.name, "Existing subscriber found, first wins");
                    continue;
                }
                tracing::debug!(target: "broker", topic = %command.name, "Subscriber registered");
                topics.insert(command.name, command.tx);
            }
            command = receivers.unsubscribe_rx.recv() => {
                let Some(command) = command else { return };
                match topics.remove(&command.name) {
                    Some(tx) => {
                        // Dropping the sender closes the subscriber channel.
                        drop(tx);
                        tracing::debug!(target: "broker", topic = %command.name, "Subscriber removed");
                    }
                    None => {
                        tracing::debug!(target: "broker", topic = %command.name, "Unsubscribe for unknown topic");
                    }
                }
                let _ = command.done.send(());
            }
            message = receivers.messages_rx.recv() => {
                let Some(message) = message else { return };
                let key = message.key();
                match topics.get(&key) {
                    Some(tx) => deliver(&key, tx, message).await,
                    None => {
                        tracing::debug!(target: "broker", topic = %key, "No channels active for topic");
                    }
                }
            }
            broadcast = receivers.broadcast_rx.recv() => {
                let Some(broadcast) = broadcast else { return };
                let prefix = format!("{}_", broadcast.user_id);
                let targets: Vec<(String, mpsc::Sender<Message>)> = topics
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, tx)| (key.clone(), tx.clone()))
                    .collect();

                if targets.is_empty() {
                    tracing::debug!(target: "broker", user_id = %broadcast.user_id, "No devices registered for user");
                }

                for (key, tx) in targets {
                    let device_id = key[prefix.len()..].to_string();
                    let message = Message {
                        user_id: broadcast.user_id.clone(),
                        device_id,
                        content: broadcast.content.clone(),
                    };
                    deliver(&key, &tx, message).await;
                }
            }
            reply = receivers.count_rx.recv() => {
                let Some(reply) = reply else { return };
                let _ = reply.send(topics.len());
            }
        }
    }
}

async fn deliver(key: &str, tx: &mpsc::Sender<Message>, message: Message) {
    if tokio::time::timeout(TOPIC_SEND_TIMEOUT, tx.send(message))
        .await
        .is_err()
    {
        tracing::warn!(target: "broker", topic = %key, "Subscriber send timed out, message dropped");
    }
}
