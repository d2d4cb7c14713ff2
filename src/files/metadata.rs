use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;

use crate::api::AppError;
use crate::files::model::{FileInfo, UploadStatus, calculate_chunks, group_file_rows};
use crate::queue::{Payload, Queue, RECONCILE_PARTITION};
use crate::store::{FileVersionRow, SyncStore, now_ts};
use crate::supervisor::messages::{ReconciliationMessage, encode_frame};
use crate::tokens::{STREAM_EXPIRY, Token};

pub const DEFAULT_LIST_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileType")]
    pub file_type: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    pub digest: String,
    pub chunks: i32,
}

#[derive(Debug, Serialize)]
pub struct PrepareResponse {
    #[serde(rename = "fileID")]
    pub file_id: String,
    #[serde(rename = "streamToken")]
    pub stream_token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
    #[serde(rename = "uploadStatus")]
    pub upload_status: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub digest: String,
    #[serde(rename = "fileSize")]
    pub file_size: i64,
    pub chunks: i32,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    #[serde(rename = "fileID")]
    pub file_id: String,
    #[serde(rename = "prevID")]
    pub prev_id: String,
    #[serde(rename = "streamToken")]
    pub stream_token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct EofResponse {
    pub eof: bool,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Upload session lifecycle: issues file versions with their stream tokens,
/// hands finished uploads to the reconciliation queue, lists versions.
#[derive(Clone)]
pub struct MetadataService {
    store: SyncStore,
    queue: Arc<dyn Queue>,
}

impl MetadataService {
    pub fn new(store: SyncStore, queue: Arc<dyn Queue>) -> Self {
        Self { store, queue }
    }

    /// First phase of a fresh upload: create the version row and its stream
    /// token in one transaction.
    pub async fn prepare(
        &self,
        user_id: &str,
        req: PrepareRequest,
    ) -> Result<PrepareResponse, AppError> {
        let chunks = calculate_chunks(req.file_size);
        if chunks != req.chunks {
            tracing::warn!(
                target: "files",
                expected = chunks,
                declared = req.chunks,
                "Chunk count mismatch on prepare"
            );
            return Err(AppError::ChunksSizeInvalid);
        }

        if self
            .store
            .find_version_by_hash(&req.digest)
            .context("Failed to check digest for duplicates")?
            .is_some()
        {
            return Err(AppError::Duplicate);
        }

        let file_id = Ulid::new().to_string();
        let now = now_ts();
        let version = FileVersionRow {
            id: file_id.clone(),
            user_id: user_id.to_string(),
            file_name: req.file_name,
            file_size: req.file_size,
            file_type: req.file_type,
            file_hash: req.digest,
            chunks,
            current_flag: false,
            upload_status: UploadStatus::Uploading.as_str().to_string(),
            prev_id: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        };

        let token = Token::for_stream(file_id.as_str(), user_id);
        self.store
            .insert_version_with_token(&version, &token)
            .context("Failed to create file version and stream token")?;

        tracing::info!(
            target: "files",
            file_id = %file_id,
            chunks = chunks,
            "Prepared file version for upload"
        );

        Ok(PrepareResponse {
            file_id,
            stream_token: token.access_token,
            expires_in: STREAM_EXPIRY.as_secs(),
            upload_status: UploadStatus::Uploading.as_str().to_string(),
            created_at: token.created_at,
        })
    }

    /// First phase of a re-upload: chain a new version onto an existing one.
    pub async fn update(
        &self,
        user_id: &str,
        file_id: &str,
        req: UpdateRequest,
    ) -> Result<UpdateResponse, AppError> {
        let existing = self
            .store
            .find_version(file_id, user_id)
            .context("Failed to load file version for update")?
            .ok_or(AppError::FileNotFound)?;

        if existing.file_hash == req.digest {
            return Err(AppError::Duplicate);
        }

        let chunks = calculate_chunks(req.file_size);
        if chunks != req.chunks {
            return Err(AppError::InvalidFileData);
        }

        let new_id = Ulid::new().to_string();
        let now = now_ts();
        let version = FileVersionRow {
            id: new_id.clone(),
            user_id: user_id.to_string(),
            file_name: existing.file_name,
            file_size: req.file_size,
            file_type: existing.file_type,
            file_hash: req.digest,
            chunks,
            current_flag: false,
            upload_status: UploadStatus::Uploading.as_str().to_string(),
            prev_id: Some(existing.id.clone()),
            end_date: None,
            created_at: now,
            updated_at: now,
        };

        let token = Token::for_stream(new_id.as_str(), user_id);
        self.store
            .insert_version_with_token(&version, &token)
            .context("Failed to create updated file version and stream token")?;

        tracing::info!(
            target: "files",
            file_id = %new_id,
            prev_id = %existing.id,
            "Prepared new file version for update"
        );

        Ok(UpdateResponse {
            file_id: new_id,
            prev_id: existing.id,
            stream_token: token.access_token,
            expires_in: STREAM_EXPIRY.as_secs(),
        })
    }

    /// Mark the upload complete and enqueue reconciliation. The status flip
    /// itself is deferred to the supervisor; an enqueue failure leaves the
    /// version in `uploading` so the client can retry EOF.
    pub async fn mark_eof(
        &self,
        user_id: &str,
        file_id: &str,
        device_id: Option<String>,
    ) -> Result<EofResponse, AppError> {
        let version = self
            .store
            .find_uploading_version(file_id, user_id)
            .context("Failed to load uploading file version")?
            .ok_or(AppError::FileNotFound)?;

        let message = ReconciliationMessage {
            file_id: version.id.clone(),
            prev_id: version.prev_id.clone(),
            user_id: user_id.to_string(),
            device_id,
        };
        let frame = encode_frame(&message)
            .context("Failed to encode reconciliation message")?;

        self.queue
            .enqueue(RECONCILE_PARTITION, Payload::new(frame))
            .await
            .map_err(|err| AppError::Internal(err.into()))?;

        tracing::info!(
            target: "files",
            file_id = %version.id,
            prev_id = ?version.prev_id,
            "Queued upload for reconciliation"
        );

        Ok(EofResponse { eof: true })
    }

    pub async fn list(&self, user_id: &str, offset: i64) -> Result<FileListResponse, AppError> {
        let (rows, has_more) = self
            .store
            .list_versions_for_user(user_id, offset, DEFAULT_LIST_LIMIT)
            .context("Failed to list file versions")?;

        if rows.is_empty() {
            tracing::debug!(target: "files", user_id = %user_id, "No files for user");
        }

        Ok(FileListResponse {
            files: group_file_rows(rows),
            has_more,
        })
    }
}
