//! Caller identity: bearer token extraction and session lookup.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use sqlx::postgres::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("unknown or expired token")]
    InvalidToken,

    #[error("session lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

/// Resolves an authenticated token to a user id.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Uuid, AuthError>;
}

/// Looks tokens up in the `sessions` table, ignoring expired rows.
pub struct PgSessionResolver {
    pool: PgPool,
}

impl PgSessionResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityResolver for PgSessionResolver {
    async fn resolve(&self, token: &str) -> Result<Uuid, AuthError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM sessions
            WHERE token = $1 AND expires_at > NOW()
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(user_id,)| user_id).ok_or(AuthError::InvalidToken)
    }
}
