mod chunks;
mod metadata;
mod queue_messages;
pub mod schema;
mod tokens;

pub use chunks::ChunkRow;
pub use metadata::FileVersionRow;

use anyhow::{Context, Result, anyhow};
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/store");

/// SQLite-backed persistence for file versions, chunk rows, tokens, and the
/// durable queue partitions.
///
/// Every service holds a clone of the same `SyncStore`; the pool is capped
/// at one connection so all writes funnel through a single writer and the
/// exclusive current-flag flip never contends with itself.
#[derive(Clone)]
pub struct SyncStore {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl SyncStore {
    /// Open (or create) the database at `path` and bring its schema up to
    /// date before handing the store out.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let database_url = prepare_database_path(&path)?;

        let pool = Pool::builder()
            .max_size(1)
            .build(ConnectionManager::<SqliteConnection>::new(&database_url))
            .with_context(|| format!("SQLite pool for {database_url} could not be built"))?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.migrate()?;

        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("schema migration did not complete: {err}"))?;

        if !applied.is_empty() {
            tracing::info!(
                target: "store",
                count = applied.len(),
                "Applied pending schema migrations"
            );
        }

        Ok(())
    }

    pub(crate) fn connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool.get().context("store connection checkout failed")
    }
}

/// The sqlite connection string wants a UTF-8 path with an existing parent
/// directory; settle both up front so pool errors stay meaningful.
fn prepare_database_path(path: &Path) -> Result<String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("cannot create {} for the sync database", parent.display())
        })?;
    }

    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("sync database path {} is not valid UTF-8", path.display()))
}

/// Current unix timestamp in seconds, the storage representation for all
/// `created_at` / `updated_at` / `end_date` columns.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) fn test_store() -> (tempfile::TempDir, SyncStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SyncStore::with_path(dir.path().join("sync-test.db")).expect("store");
    (dir, store)
}
