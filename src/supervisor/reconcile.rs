//! The reconciliation algorithm: fill inherited chunks, validate the
//! next-chunk chain, flip the current flag, notify.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::files::{ChunkDetail, FileInfo, UploadStatus, group_file_rows};
use crate::queue::Payload;
use crate::store::{ChunkRow, SyncStore};
use crate::supervisor::NotificationPublisher;
use crate::supervisor::messages::{
    CodecError, NotificationMessage, ReconciliationMessage, decode_frame,
};
use crate::workers::Processor;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The predecessor version named by the message does not exist.
    /// Permanent: the message is dropped, never retried.
    #[error("file_merge_conflict")]
    MergeConflict,
    /// Chain validation failed while enforcement is enabled.
    #[error("chain_validation_failed")]
    ChainInvalid,
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Worker-pool processor running the reconciliation algorithm over each
/// batch of queue payloads.
pub struct ReconcileExecutor {
    store: SyncStore,
    notifier: NotificationPublisher,
    enforce_chain_validation: bool,
}

impl ReconcileExecutor {
    pub fn new(store: SyncStore, notifier: NotificationPublisher) -> Self {
        Self {
            store,
            notifier,
            enforce_chain_validation: false,
        }
    }

    /// Promote chain-validation failures from log-only to hard failures
    /// (the flip is skipped and the message dropped).
    pub fn with_enforced_chain_validation(mut self, enforce: bool) -> Self {
        self.enforce_chain_validation = enforce;
        self
    }

    async fn execute_each(&self, msg: &ReconciliationMessage) -> Result<(), ReconcileError> {
        // First version of a file: nothing to compare against, promote it.
        let Some(prev_id) = &msg.prev_id else {
            self.store
                .promote_initial_version(&msg.file_id, UploadStatus::Completed.as_str())?;
            return Ok(());
        };

        let rows = self
            .store
            .select_files(&[msg.file_id.clone(), prev_id.clone()])?;
        let mut groups = group_file_rows(rows);

        if groups.len() < 2 {
            tracing::warn!(
                target: "supervisor",
                file_id = %msg.file_id,
                prev_id = %prev_id,
                found = groups.len(),
                "Predecessor version missing, dropping message"
            );
            return Err(ReconcileError::MergeConflict);
        }

        // Rows may come back in either order; pin down which is which.
        let (this_file, prev_file) = match (groups.pop(), groups.pop()) {
            (Some(second), Some(first)) => {
                if first.id == msg.file_id {
                    (first, second)
                } else {
                    (second, first)
                }
            }
            _ => return Err(ReconcileError::MergeConflict),
        };

        // A changed chunk count means the file was wholly replaced; nothing
        // can be inherited from the predecessor.
        let fillers = if this_file.n_chunks == prev_file.n_chunks {
            missing_chunks(&this_file, &prev_file)
        } else {
            HashMap::new()
        };

        let reconstructed = reconstruct(&this_file, &prev_file);
        let valid = validate(&reconstructed, &prev_file);
        tracing::info!(
            target: "supervisor",
            file_id = %msg.file_id,
            valid = valid,
            "Chunk chain validation"
        );
        if !valid && self.enforce_chain_validation {
            return Err(ReconcileError::ChainInvalid);
        }

        let mut status = UploadStatus::Completed;

        if !fillers.is_empty() {
            tracing::info!(
                target: "supervisor",
                file_id = %msg.file_id,
                count = fillers.len(),
                "Inheriting chunks from previous version"
            );

            let inherited: Vec<ChunkRow> = fillers
                .values()
                .map(|chunk| {
                    ChunkRow::new(
                        this_file.user_id.as_str(),
                        this_file.id.as_str(),
                        chunk.chunk_id,
                        chunk.chunk_blob_url.as_str(),
                        chunk.chunk_hash.as_str(),
                        chunk.next_chunk_id,
                    )
                })
                .collect();

            if let Err(err) = self.store.insert_chunks_batch(&inherited) {
                tracing::error!(
                    target: "supervisor",
                    file_id = %msg.file_id,
                    error = ?err,
                    "Failed to insert inherited chunks"
                );
                status = UploadStatus::Failed;
            }
        }

        self.store
            .flip_current_version(&msg.file_id, prev_id, status.as_str())?;

        Ok(())
    }
}

#[async_trait]
impl Processor<Vec<Payload>> for ReconcileExecutor {
    async fn process(&self, payloads: Vec<Payload>) -> anyhow::Result<()> {
        let mut events = Vec::new();

        for payload in &payloads {
            let msg: ReconciliationMessage = decode_frame(&payload.message)
                .map_err(ReconcileError::Decode)?;

            self.execute_each(&msg).await?;

            events.push(NotificationMessage {
                file_id: msg.file_id,
                user_id: msg.user_id,
                device_id: msg.device_id,
            });
        }

        if events.is_empty() {
            return Ok(());
        }

        self.notifier.notify(&events).await?;
        Ok(())
    }
}

/// Chunks present in `prev` but not uploaded for `this`: the set to
/// inherit by reference.
pub fn missing_chunks(this: &FileInfo, prev: &FileInfo) -> HashMap<String, ChunkDetail> {
    prev.chunks
        .iter()
        .filter(|(chunk_id, _)| !this.chunks.contains_key(*chunk_id))
        .map(|(chunk_id, chunk)| (chunk_id.clone(), chunk.clone()))
        .collect()
}

/// The new version as it will look after filling: uploaded chunks plus the
/// inherited ones.
pub fn reconstruct(this: &FileInfo, prev: &FileInfo) -> FileInfo {
    let mut reconstructed = this.clone();
    for (chunk_id, chunk) in missing_chunks(this, prev) {
        reconstructed.chunks.insert(chunk_id, chunk);
    }
    reconstructed
}

/// Check the reconstructed next-chunk chain against the predecessor's:
/// every chunk must carry a link and the link must match position for
/// position.
pub fn validate(reconstructed: &FileInfo, prev: &FileInfo) -> bool {
    if reconstructed.n_chunks != prev.n_chunks {
        return false;
    }

    let mut prev_chain: HashMap<&str, i64> = HashMap::new();
    for (chunk_id, chunk) in &prev.chunks {
        let Some(next) = chunk.next_chunk_id else {
            return false;
        };
        prev_chain.insert(chunk_id.as_str(), next);
    }

    for (chunk_id, chunk) in &reconstructed.chunks {
        let Some(next) = chunk.next_chunk_id else {
            return false;
        };
        if prev_chain.get(chunk_id.as_str()) != Some(&next) {
            return false;
        }
    }

    true
}
