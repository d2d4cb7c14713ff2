mod auth;
mod error;
mod handlers;
mod sse;

pub use auth::CurrentToken;
pub use error::AppError;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::{StreamSyncBroker, SubscriberRegistry};
use crate::files::{ChunkService, DownloadService, MetadataService};
use crate::tokens::TokenStore;

/// Multipart chunk uploads carry one 4 MiB chunk plus form overhead.
const CHUNK_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub metadata: MetadataService,
    pub chunks: ChunkService,
    pub downloads: DownloadService,
    pub token_store: Arc<dyn TokenStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub syncer: Arc<StreamSyncBroker>,
}

/// Standard API response envelope
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: i32,
    #[serde(rename = "httpStatus")]
    pub http_status: u16,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: &str, code: i32, http_status: u16) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.to_string(),
                code,
                http_status,
            }),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    tracing::debug!(target: "api", "Creating API router");

    // Routes authenticated by the long-lived user access token.
    let access_routes = Router::new()
        .route(
            "/my/files",
            post(handlers::prepare_file).get(handlers::list_files),
        )
        .route("/my/files/:file_id", patch(handlers::update_file))
        .route("/subscribe/devices", get(sse::subscribe_device))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_access_token,
        ));

    // Routes authenticated by the short-lived per-file stream token.
    let stream_routes = Router::new()
        .route("/my/files/:file_id/chunks", patch(handlers::upsert_chunk))
        .route("/my/files/:file_id/eof", put(handlers::mark_eof))
        .route("/my/files/:file_id/download", get(handlers::download_file))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_stream_token,
        ))
        .layer(DefaultBodyLimit::max(CHUNK_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(access_routes)
        .merge(stream_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
