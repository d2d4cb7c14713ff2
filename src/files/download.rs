use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppError;
use crate::blobstore::BlobStore;
use crate::files::model::TERMINAL_NEXT_CHUNK;
use crate::store::{ChunkRow, FileVersionRow, SyncStore};

/// Composes a complete file from its chunk rows by walking the next-chunk
/// chain from chunk 0 and concatenating the blobs.
#[derive(Clone)]
pub struct DownloadService {
    store: SyncStore,
    blobs: Arc<dyn BlobStore>,
}

impl DownloadService {
    pub fn new(store: SyncStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub async fn build(
        &self,
        file_id: &str,
        user_id: &str,
    ) -> Result<(FileVersionRow, Vec<u8>), AppError> {
        let version = self
            .store
            .find_version(file_id, user_id)
            .context("Failed to load file version for download")?
            .ok_or(AppError::FileNotFound)?;

        let chunks = self
            .store
            .chunks_for_file(file_id)
            .context("Failed to load chunks for download")?;

        let blob_urls = chain_blob_urls(&chunks, version.chunks as usize)?;
        let bytes = self
            .blobs
            .build_file(&blob_urls)
            .await
            .context("Failed to compose file from chunks")?;

        tracing::info!(
            target: "files",
            file_id = %file_id,
            chunks = blob_urls.len(),
            bytes = bytes.len(),
            "Composed file for download"
        );

        Ok((version, bytes))
    }
}

/// Order chunk blob locators by following `next_chunk_id` from chunk 0.
/// A missing link, a premature terminal, or a count mismatch all mean the
/// version is not materializable.
fn chain_blob_urls(chunks: &[ChunkRow], expected: usize) -> Result<Vec<String>, AppError> {
    if chunks.is_empty() || chunks.len() != expected {
        return Err(AppError::FileNotFound);
    }

    let by_id: HashMap<i64, &ChunkRow> = chunks.iter().map(|c| (c.chunk_id, c)).collect();

    let mut blob_urls = Vec::with_capacity(chunks.len());
    let mut cursor = 0i64;

    while blob_urls.len() < chunks.len() {
        let chunk = by_id.get(&cursor).ok_or(AppError::FileNotFound)?;
        blob_urls.push(chunk.chunk_blob_url.clone());

        match chunk.next_chunk_id {
            Some(TERMINAL_NEXT_CHUNK) => break,
            Some(next) => cursor = next,
            None => return Err(AppError::FileNotFound),
        }
    }

    if blob_urls.len() != expected {
        return Err(AppError::FileNotFound);
    }

    Ok(blob_urls)
}
