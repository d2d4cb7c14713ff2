//! Bearer tokens scoping access to a user account or a single upload stream.

use async_trait::async_trait;
use rand::RngCore;
use std::time::Duration;
use thiserror::Error;

use crate::store::now_ts;

/// Long-lived token identifying a user.
pub const ACCESS_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
/// Short-lived token scoped to one file version's upload session.
/// Deliberately shorter than some legitimate upload sessions; there is no
/// refresh; a stalled session re-runs prepare/update.
pub const STREAM_EXPIRY: Duration = Duration::from_secs(20 * 60);
const REFRESH_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// `resource_id` is a user id.
    User,
    /// `resource_id` is a file-version id.
    Stream,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Stream => "stream",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(ResourceType::User),
            "stream" => Some(ResourceType::Stream),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Option<String>,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Token {
    fn new(
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        user_id: Option<String>,
        access_expiry: Duration,
    ) -> Self {
        let now = now_ts();
        Self {
            resource_id: resource_id.into(),
            resource_type,
            access_token: generate_token(32),
            refresh_token: generate_token(64),
            user_id,
            access_expires_at: now + access_expiry.as_secs() as i64,
            refresh_expires_at: now + REFRESH_EXPIRY.as_secs() as i64,
            created_at: now,
            updated_at: now,
        }
    }

    /// Access token identifying a user for 24 hours.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self::new(user_id.clone(), ResourceType::User, Some(user_id), ACCESS_EXPIRY)
    }

    /// Stream token authorizing chunk upload and EOF for one file version.
    pub fn for_stream(file_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::new(file_id, ResourceType::Stream, Some(user_id.into()), STREAM_EXPIRY)
    }

    pub fn has_access_expired(&self) -> bool {
        self.access_expires_at <= now_ts()
    }
}

/// Random token material, hex-encoded (`len` bytes of entropy).
pub fn generate_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token_not_found")]
    NotFound,
    #[error("token_expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Capability abstraction over token persistence; the SQLite store is the
/// only production implementation.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: &Token) -> Result<(), TokenError>;

    /// Resolve a user access token.
    async fn find_by_access(&self, access_token: &str) -> Result<Token, TokenError>;

    /// Resolve a stream token scoped to `file_id`.
    async fn find_by_stream(&self, stream_token: &str, file_id: &str)
        -> Result<Token, TokenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_is_hex_of_requested_length() {
        let token = generate_token(32);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stream_token_is_scoped_and_short_lived() {
        let token = Token::for_stream("file-1", "user-1");
        assert_eq!(token.resource_type, ResourceType::Stream);
        assert_eq!(token.resource_id, "file-1");
        assert_eq!(token.user_id.as_deref(), Some("user-1"));
        assert!(!token.has_access_expired());
        assert!(token.access_expires_at <= now_ts() + STREAM_EXPIRY.as_secs() as i64);
    }

    #[test]
    fn expired_token_is_detected() {
        let mut token = Token::for_user("user-1");
        token.access_expires_at = now_ts() - 1;
        assert!(token.has_access_expired());
    }
}
