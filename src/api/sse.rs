use axum::{
    extract::{Extension, Query, State},
    response::{
        Sse,
        sse::{Event as SseEvent, KeepAlive},
    },
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use super::auth::CurrentToken;
use super::{AppError, AppState};
use crate::broker::{Demand, Message, StreamSyncBroker, SubscriberRegistry, topic_key};

/// How often a connected device pulls one notification from its partition.
const DEMAND_TICK: Duration = Duration::from_secs(1);

#[derive(Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "deviceID")]
    pub device_id: Option<String>,
}

/// GET /subscribe/devices?deviceID=... is the long-lived SSE stream carrying
/// update events for one `(user, device)` pair.
pub async fn subscribe_device(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let device_id = query.device_id.ok_or(AppError::InvalidFileData)?;
    let user_id = token.resource_id.clone();
    let topic = topic_key(&user_id, &device_id);

    tracing::info!(target: "api::sse", topic = %topic, "New SSE connection established");
    let receiver = state.registry.subscribe(&topic).await;

    let (out_tx, out_rx) = mpsc::channel(8);
    tokio::spawn(connection_loop(
        state.registry.clone(),
        state.syncer.clone(),
        receiver,
        out_tx,
        user_id,
        device_id,
        topic,
    ));

    let stream = ReceiverStream::new(out_rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Per-connection pump: forwards registry messages to the wire and ticks
/// demand into the sync broker. Every exit path deregisters the subscriber
/// so the registry returns to its pre-connect size.
async fn connection_loop(
    registry: Arc<SubscriberRegistry>,
    syncer: Arc<StreamSyncBroker>,
    mut receiver: mpsc::Receiver<Message>,
    out_tx: mpsc::Sender<SseEvent>,
    user_id: String,
    device_id: String,
    topic: String,
) {
    let mut ticker = tokio::time::interval(DEMAND_TICK);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                // A closed subscriber channel means we were unsubscribed.
                let Some(message) = message else { break };

                let frame = format!(
                    "userID:{},deviceID:{},{}",
                    user_id, device_id, message.content
                );
                if out_tx.send(SseEvent::default().data(frame)).await.is_err() {
                    // Client disconnected; the response stream is gone.
                    break;
                }
            }
            _ = ticker.tick() => {
                if out_tx.is_closed() {
                    break;
                }
                syncer
                    .handle_demand(Demand {
                        count: 1,
                        user_id: user_id.clone(),
                    })
                    .await;
            }
        }
    }

    tracing::info!(target: "api::sse", topic = %topic, "Deregistering SSE subscriber");
    registry.unsubscribe(&topic).await;
}
