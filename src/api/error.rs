use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::ApiResponse;

/// Semantic error kinds surfaced by the service layer.
///
/// Every variant maps to a stable `(key, code, httpStatus)` triple rendered
/// through the response envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("chunks_size_invalid")]
    ChunksSizeInvalid,
    #[error("invalid_file_data")]
    InvalidFileData,
    #[error("invalid_file_chunk")]
    InvalidFileChunk,
    #[error("corrupted_file")]
    CorruptedFile,
    #[error("duplicate")]
    Duplicate,
    #[error("file_not_found")]
    FileNotFound,
    #[error("token_not_found")]
    TokenNotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("token_expired")]
    TokenExpired,
    #[error("partial_failure")]
    PartialFailure,
    #[error("internal_error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable message key of the envelope.
    pub fn key(&self) -> &'static str {
        match self {
            AppError::ChunksSizeInvalid => "chunks_size_invalid",
            AppError::InvalidFileData => "invalid_file_data",
            AppError::InvalidFileChunk => "invalid_file_chunk",
            AppError::CorruptedFile => "corrupted_file",
            AppError::Duplicate => "duplicate",
            AppError::FileNotFound => "file_not_found",
            AppError::TokenNotFound => "token_not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::TokenExpired => "token_expired",
            AppError::PartialFailure => "partial_failure",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::ChunksSizeInvalid => 2005,
            AppError::InvalidFileData => 2006,
            AppError::InvalidFileChunk => 5002,
            AppError::CorruptedFile => 5001,
            AppError::Duplicate => 2009,
            AppError::FileNotFound => 4041,
            AppError::TokenNotFound => 4042,
            AppError::Unauthorized => 4011,
            AppError::TokenExpired => 2007,
            AppError::PartialFailure => 5005,
            AppError::Internal(_) => 5000,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::ChunksSizeInvalid
            | AppError::InvalidFileData
            | AppError::InvalidFileChunk
            | AppError::CorruptedFile
            | AppError::Duplicate => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FileNotFound | AppError::TokenNotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::TokenExpired => StatusCode::GONE,
            AppError::PartialFailure | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<crate::tokens::TokenError> for AppError {
    fn from(err: crate::tokens::TokenError) -> Self {
        match err {
            crate::tokens::TokenError::NotFound => AppError::TokenNotFound,
            crate::tokens::TokenError::Expired => AppError::TokenExpired,
            crate::tokens::TokenError::Store(err) => AppError::Internal(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();

        match &self {
            AppError::Internal(err) => {
                tracing::error!(
                    target: "api::error",
                    status = status.as_u16(),
                    error = ?err,
                    "Internal server error"
                );
            }
            other => {
                tracing::warn!(
                    target: "api::error",
                    status = status.as_u16(),
                    error = other.key(),
                    "Request failed"
                );
            }
        }

        let body = Json(ApiResponse::<()>::error(
            self.key(),
            self.code(),
            status.as_u16(),
        ));
        (status, body).into_response()
    }
}
