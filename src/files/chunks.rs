use anyhow::Context as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use crate::api::AppError;
use crate::blobstore::BlobStore;
use crate::store::{ChunkRow, SyncStore};

#[derive(Debug, Clone)]
pub struct ChunkUploadRequest {
    pub user_id: String,
    pub file_id: String,
    pub chunk_id: i64,
    pub next_chunk_id: i64,
    pub chunk_digest: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkUploadResponse {
    #[serde(rename = "chunkID")]
    pub chunk_id: i64,
    #[serde(rename = "nextChunkID")]
    pub next_chunk_id: i64,
    #[serde(rename = "chunkBlobUrl")]
    pub chunk_blob_url: String,
    #[serde(rename = "chunkHash")]
    pub chunk_hash: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// An async reader that feeds every byte it passes through into a SHA-256
/// hasher, so the upload stream is consumed exactly once: the blob store
/// reads through this adapter while the digest accumulates on the side.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Hex digest of everything read so far.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();

        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];
                if !filled.is_empty() {
                    self.hasher.update(filled);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Accepts chunk uploads: streams bytes into the blob store while hashing,
/// verifies the declared digest, and records the chunk row.
#[derive(Clone)]
pub struct ChunkService {
    store: SyncStore,
    blobs: Arc<dyn BlobStore>,
}

impl ChunkService {
    pub fn new(store: SyncStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Store one chunk. Retrying the same `(file_id, chunk_id)` with the
    /// same digest is a no-op; a digest mismatch leaves an orphaned blob
    /// behind and no chunk row.
    pub async fn upsert<R: AsyncRead + Send + Unpin>(
        &self,
        req: ChunkUploadRequest,
        data: R,
    ) -> Result<ChunkUploadResponse, AppError> {
        let mut reader = HashingReader::new(data);
        let blob_url = self
            .blobs
            .put_chunk(&req.file_id, req.chunk_id, &mut reader)
            .await
            .context("Failed to store chunk blob")?;

        let digest = reader.finalize_hex();
        if digest != req.chunk_digest {
            tracing::warn!(
                target: "files",
                file_id = %req.file_id,
                chunk_id = req.chunk_id,
                declared = %req.chunk_digest,
                computed = %digest,
                "Chunk digest mismatch"
            );
            return Err(AppError::CorruptedFile);
        }

        let row = ChunkRow::new(
            req.user_id.as_str(),
            req.file_id.as_str(),
            req.chunk_id,
            blob_url.as_str(),
            req.chunk_digest.as_str(),
            Some(req.next_chunk_id),
        );
        self.store
            .upsert_chunk(&row)
            .context("Failed to record chunk row")?;

        tracing::debug!(
            target: "files",
            file_id = %req.file_id,
            chunk_id = req.chunk_id,
            next_chunk_id = req.next_chunk_id,
            "Chunk stored"
        );

        Ok(ChunkUploadResponse {
            chunk_id: row.chunk_id,
            next_chunk_id: req.next_chunk_id,
            chunk_blob_url: blob_url,
            chunk_hash: row.chunk_hash,
            created_at: row.created_at,
        })
    }
}
