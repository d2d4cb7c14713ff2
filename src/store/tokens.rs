use super::SyncStore;
use crate::tokens::{ResourceType, Token, TokenError, TokenStore};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use diesel::prelude::*;

use crate::store::schema::tokens::{self, dsl as tokens_dsl};

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = tokens)]
pub(crate) struct TokenRow {
    pub access_token: String,
    pub resource_id: String,
    pub resource_type: String,
    pub refresh_token: String,
    pub user_id: Option<String>,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Token> for TokenRow {
    fn from(token: &Token) -> Self {
        Self {
            access_token: token.access_token.clone(),
            resource_id: token.resource_id.clone(),
            resource_type: token.resource_type.as_str().to_string(),
            refresh_token: token.refresh_token.clone(),
            user_id: token.user_id.clone(),
            access_expires_at: token.access_expires_at,
            refresh_expires_at: token.refresh_expires_at,
            created_at: token.created_at,
            updated_at: token.updated_at,
        }
    }
}

impl TryFrom<TokenRow> for Token {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let resource_type = ResourceType::from_str(&row.resource_type)
            .ok_or_else(|| anyhow!("Unknown token resource type {}", row.resource_type))?;

        Ok(Token {
            resource_id: row.resource_id,
            resource_type,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            user_id: row.user_id,
            access_expires_at: row.access_expires_at,
            refresh_expires_at: row.refresh_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TokenStore for SyncStore {
    async fn create(&self, token: &Token) -> Result<(), TokenError> {
        let mut conn = self.connection()?;
        let row = TokenRow::from(token);
        diesel::insert_into(tokens::table)
            .values(&row)
            .execute(&mut conn)
            .context("Failed to insert token")?;
        Ok(())
    }

    async fn find_by_access(&self, access_token: &str) -> Result<Token, TokenError> {
        let mut conn = self.connection()?;
        let row = tokens_dsl::tokens
            .filter(tokens_dsl::access_token.eq(access_token))
            .filter(tokens_dsl::resource_type.eq(ResourceType::User.as_str()))
            .first::<TokenRow>(&mut conn)
            .optional()
            .context("Failed to query access token")?
            .ok_or(TokenError::NotFound)?;

        let token = Token::try_from(row)?;
        if token.has_access_expired() {
            return Err(TokenError::Expired);
        }

        Ok(token)
    }

    async fn find_by_stream(
        &self,
        stream_token: &str,
        file_id: &str,
    ) -> Result<Token, TokenError> {
        let mut conn = self.connection()?;
        let row = tokens_dsl::tokens
            .filter(tokens_dsl::access_token.eq(stream_token))
            .filter(tokens_dsl::resource_type.eq(ResourceType::Stream.as_str()))
            .filter(tokens_dsl::resource_id.eq(file_id))
            .first::<TokenRow>(&mut conn)
            .optional()
            .context("Failed to query stream token")?
            .ok_or(TokenError::NotFound)?;

        let token = Token::try_from(row)?;
        if token.has_access_expired() {
            return Err(TokenError::Expired);
        }

        Ok(token)
    }
}
