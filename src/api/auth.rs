use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;

use super::{AppError, AppState};
use crate::tokens::{Token, TokenError};

pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
pub const STREAM_TOKEN_HEADER: &str = "X-Stream-Token";
/// Download links carry the tokens in the query string instead of headers:
/// `X-Sig-Token=<stream>:<access>`.
pub const SIG_TOKEN_QUERY: &str = "X-Sig-Token";

const BEARER_PREFIX: &str = "Bearer ";

/// The validated token of the current request, stored in extensions.
#[derive(Clone)]
pub struct CurrentToken(pub Token);

fn bearer_token(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn map_auth_error(err: TokenError) -> AppError {
    match err {
        TokenError::NotFound => AppError::Unauthorized,
        TokenError::Expired => AppError::TokenExpired,
        TokenError::Store(err) => AppError::Internal(err),
    }
}

/// Require a valid `X-Access-Token: Bearer …` user token.
pub async fn require_access_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access_token =
        bearer_token(request.headers(), ACCESS_TOKEN_HEADER).ok_or(AppError::Unauthorized)?;

    let token = state
        .token_store
        .find_by_access(&access_token)
        .await
        .map_err(map_auth_error)?;

    tracing::debug!(target: "api", user_id = %token.resource_id, "Access token validated");
    request.extensions_mut().insert(CurrentToken(token));
    Ok(next.run(request).await)
}

/// Require a valid stream token scoped to the `:file_id` of the route.
/// Both bearer headers must be present, or the pair may ride in the
/// `X-Sig-Token` query parameter for plain download links.
pub async fn require_stream_token(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let file_id = params
        .get("file_id")
        .cloned()
        .ok_or(AppError::Unauthorized)?;

    let headers = request.headers();
    let stream_token = match (
        bearer_token(headers, ACCESS_TOKEN_HEADER),
        bearer_token(headers, STREAM_TOKEN_HEADER),
    ) {
        (Some(_access), Some(stream)) => stream,
        _ => {
            let signed = query.get(SIG_TOKEN_QUERY).ok_or(AppError::Unauthorized)?;
            let (stream, access) = signed.split_once(':').ok_or(AppError::Unauthorized)?;
            if stream.is_empty() || access.is_empty() {
                return Err(AppError::Unauthorized);
            }
            stream.to_string()
        }
    };

    let token = state
        .token_store
        .find_by_stream(&stream_token, &file_id)
        .await
        .map_err(map_auth_error)?;

    if token.user_id.is_none() {
        tracing::error!(target: "api", file_id = %file_id, "Stream token has no user attached");
        return Err(AppError::Unauthorized);
    }

    tracing::debug!(target: "api", file_id = %file_id, "Stream token validated");
    request.extensions_mut().insert(CurrentToken(token));
    Ok(next.run(request).await)
}
