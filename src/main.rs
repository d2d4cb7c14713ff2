use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use driftsync::api::AppState;
use driftsync::blobstore::{BlobStore, LocalFsBlobStore};
use driftsync::broker::{NotifyProducer, SseConsumer, StreamSyncBroker, SubscriberRegistry};
use driftsync::files::{ChunkService, DownloadService, MetadataService};
use driftsync::queue::{Queue, SqliteQueue};
use driftsync::supervisor::{NotificationPublisher, ReconcileExecutor, ReconciliationSupervisor};
use driftsync::tokens::TokenStore;
use driftsync::{AppConfig, LogConfig, SyncStore, create_router, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = init_logging(LogConfig::from(&config))?;

    tracing::info!(target: "main", "Starting driftsync server");

    let cancel = CancellationToken::new();

    let store = SyncStore::with_path(config.database_path.clone())
        .context("Failed to open metadata store")?;
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(store.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalFsBlobStore::new(&config.blob_root));
    let token_store: Arc<dyn TokenStore> = Arc::new(store.clone());

    // SSE delivery: registry event loop plus the queue-to-registry bridge.
    let mut registry = SubscriberRegistry::new("file_events");
    registry.start(cancel.clone());
    let registry = Arc::new(registry);

    let mut syncer = StreamSyncBroker::new(
        "update_syncer",
        NotifyProducer::new(queue.clone()),
        SseConsumer::new(registry.clone()),
    );
    syncer.start(cancel.clone());
    let syncer = Arc::new(syncer);

    // Background reconciliation of finished uploads.
    let executor = ReconcileExecutor::new(
        store.clone(),
        NotificationPublisher::new(queue.clone()),
    )
    .with_enforced_chain_validation(config.enforce_chain_validation);
    let supervisor = ReconciliationSupervisor::new(queue.clone(), executor)
        .with_workers(config.reconcile_workers)
        .with_demand_interval(config.demand_interval);
    tokio::spawn(supervisor.run(cancel.clone()));

    let state = AppState {
        metadata: MetadataService::new(store.clone(), queue.clone()),
        chunks: ChunkService::new(store.clone(), blobs.clone()),
        downloads: DownloadService::new(store.clone(), blobs.clone()),
        token_store,
        registry,
        syncer,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(target: "main", port = config.port, "Server listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "main", "Shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await
        .context("Server failed")?;

    cancel.cancel();
    tracing::info!(target: "main", "Server stopped");

    Ok(())
}
