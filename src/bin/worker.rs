//! Standalone reconciliation worker: runs the supervisor against the same
//! store and queue as the server, without the HTTP surface.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use driftsync::queue::{Queue, SqliteQueue};
use driftsync::supervisor::{NotificationPublisher, ReconcileExecutor, ReconciliationSupervisor};
use driftsync::{AppConfig, LogConfig, SyncStore, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    let _log_guard = init_logging(LogConfig::from(&config))?;

    tracing::info!(target: "main", "Starting driftsync reconciliation worker");

    let cancel = CancellationToken::new();

    let store = SyncStore::with_path(config.database_path.clone())
        .context("Failed to open metadata store")?;
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(store.clone()));

    let executor = ReconcileExecutor::new(
        store.clone(),
        NotificationPublisher::new(queue.clone()),
    )
    .with_enforced_chain_validation(config.enforce_chain_validation);
    let supervisor = ReconciliationSupervisor::new(queue, executor)
        .with_workers(config.reconcile_workers)
        .with_demand_interval(config.demand_interval);

    let run = tokio::spawn(supervisor.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!(target: "main", "Shutdown signal received");
    cancel.cancel();

    let _ = run.await;
    tracing::info!(target: "main", "Worker stopped");

    Ok(())
}
