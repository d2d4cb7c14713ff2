use axum::{
    Json,
    extract::{Extension, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::io::Cursor;

use super::auth::CurrentToken;
use super::{ApiResponse, AppError, AppState};
use crate::files::{
    ChunkUploadRequest, EofResponse, FileListResponse, PrepareRequest, PrepareResponse,
    UpdateRequest, UpdateResponse,
};

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /my/files, first phase of a fresh upload.
pub async fn prepare_file(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    Json(req): Json<PrepareRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PrepareResponse>>), AppError> {
    let resp = state.metadata.prepare(&token.resource_id, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(resp))))
}

/// PATCH /my/files/:file_id, first phase of a versioned re-upload.
pub async fn update_file(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    Path(file_id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ApiResponse<UpdateResponse>>, AppError> {
    let resp = state
        .metadata
        .update(&token.resource_id, &file_id, req)
        .await?;
    Ok(Json(ApiResponse::success(resp)))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: i64,
}

/// GET /my/files?offset=N
pub async fn list_files(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<FileListResponse>>, AppError> {
    let resp = state.metadata.list(&token.resource_id, query.offset).await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// PATCH /my/files/:file_id/chunks: multipart chunk upload under a stream
/// token. The stream token's resource id is the file id; its user id is the
/// uploading user.
pub async fn upsert_chunk(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<crate::files::ChunkUploadResponse>>), AppError> {
    let user_id = token.user_id.clone().ok_or(AppError::Unauthorized)?;
    let file_id = token.resource_id.clone();

    let mut chunk_id: Option<i64> = None;
    let mut next_chunk_id: Option<i64> = None;
    let mut chunk_digest: Option<String> = None;
    let mut data: Option<bytes::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::InvalidFileChunk)?
    {
        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("id") => {
                let text = field.text().await.map_err(|_| AppError::InvalidFileChunk)?;
                chunk_id = Some(text.parse().map_err(|_| AppError::InvalidFileChunk)?);
            }
            Some("nextChunkID") => {
                let text = field.text().await.map_err(|_| AppError::InvalidFileChunk)?;
                next_chunk_id = Some(text.parse().map_err(|_| AppError::InvalidFileChunk)?);
            }
            Some("chunkDigest") => {
                chunk_digest =
                    Some(field.text().await.map_err(|_| AppError::InvalidFileChunk)?);
            }
            Some("chunkSize") => {
                // Declared size is advisory; the body is hashed as read.
                let _ = field.text().await.map_err(|_| AppError::InvalidFileChunk)?;
            }
            Some("data") => {
                data = Some(field.bytes().await.map_err(|_| AppError::InvalidFileChunk)?);
            }
            _ => {}
        }
    }

    let (Some(chunk_id), Some(next_chunk_id), Some(chunk_digest), Some(data)) =
        (chunk_id, next_chunk_id, chunk_digest, data)
    else {
        return Err(AppError::InvalidFileChunk);
    };

    let req = ChunkUploadRequest {
        user_id,
        file_id,
        chunk_id,
        next_chunk_id,
        chunk_digest,
    };
    let resp = state.chunks.upsert(req, Cursor::new(data)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(resp))))
}

#[derive(Deserialize)]
pub struct EofQuery {
    #[serde(rename = "deviceID")]
    pub device_id: Option<String>,
}

/// PUT /my/files/:file_id/eof marks the upload complete and enqueues reconciliation.
pub async fn mark_eof(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
    Query(query): Query<EofQuery>,
) -> Result<Json<ApiResponse<EofResponse>>, AppError> {
    let user_id = token.user_id.clone().ok_or(AppError::Unauthorized)?;
    let file_id = token.resource_id.clone();

    let resp = state
        .metadata
        .mark_eof(&user_id, &file_id, query.device_id)
        .await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// GET /my/files/:file_id/download sends the composed file back.
pub async fn download_file(
    State(state): State<AppState>,
    Extension(CurrentToken(token)): Extension<CurrentToken>,
) -> Result<Response, AppError> {
    let user_id = token.user_id.clone().ok_or(AppError::Unauthorized)?;
    let file_id = token.resource_id.clone();

    let (version, bytes) = state.downloads.build(&file_id, &user_id).await?;

    let content_type = if version.file_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        version.file_type.clone()
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", version.file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}
