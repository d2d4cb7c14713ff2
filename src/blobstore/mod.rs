//! Raw chunk persistence, addressed by `(file_id, chunk_id)`.

mod localfs;

pub use localfs::LocalFsBlobStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid blob location: {0}")]
    InvalidLocation(String),
}

/// Capability abstraction over chunk-byte storage (allows mocking in tests).
///
/// Blob writes are not transactional with the SQL store; a crashed upload
/// may leave an orphaned blob behind.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist one chunk's bytes, returning its opaque locator.
    async fn put_chunk(
        &self,
        file_id: &str,
        chunk_id: i64,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<String, BlobError>;

    /// Open a single chunk for reading by its locator.
    async fn open_chunk(
        &self,
        blob_url: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, BlobError>;

    /// Compose a whole file from its chunk locators, in the given order.
    async fn build_file(&self, blob_urls: &[String]) -> Result<Vec<u8>, BlobError>;
}
