//! Connection Gate: bearer-token authentication for inbound gateway
//! connections. Runs before the WebSocket upgrade, so a rejected attempt
//! never reaches the Presence Table.

use axum::http::{HeaderMap, header};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use murmur_types::api::Claims;
use murmur_types::models::UserId;

use crate::error::AuthError;

/// Who an admitted connection belongs to, decoded from its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Pulls the token from `Authorization: Bearer ...`, falling back to the
/// `token` query parameter for clients that cannot set handshake headers.
pub fn bearer_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query_token)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verifies signature and expiry of `token` against `secret`.
pub fn authenticate(token: Option<&str>, secret: &str) -> Result<Identity, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("token rejected: {}", e);
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken,
        }
    })?;

    Ok(Identity {
        user_id: token_data.claims.sub,
        username: token_data.claims.username,
    })
}

/// Signs a token for `user_id` that expires `ttl` from now.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
