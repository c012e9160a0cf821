//! Bearer-token authentication.
//!
//! Tokens have the shape `<payload>.<mac>` where `payload` is the
//! base64url-encoded JSON claims and `mac` is the hex BLAKE3 keyed hash of the
//! payload under a key derived from the server secret. Comparison of MACs
//! goes through `blake3::Hash`, whose equality is constant-time.
//!
//! Authentication failures are deliberately coarse in their HTTP response
//! (always 401) and are kept apart from any habit-level rejection.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: i64,
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            key: *blake3::hash(secret.as_bytes()).as_bytes(),
            ttl,
        }
    }

    /// Issue a token for `user_id`, valid for the configured lifetime.
    pub fn issue(&self, user_id: Uuid, now: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: user_id,
            exp: now
                .checked_add_signed(self.ttl)
                .map_or(i64::MAX, |expiry| expiry.timestamp()),
        };
        // Serializing a Uuid and an i64 cannot fail
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());

        format!("{}.{}", payload, mac.to_hex())
    }

    /// Verify a token and return the user id it was issued for.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, AuthError> {
        let (payload, mac_hex) = token.split_once('.').ok_or(AuthError::InvalidToken)?;

        let presented = blake3::Hash::from_hex(mac_hex).map_err(|_| AuthError::InvalidToken)?;
        let expected = blake3::keyed_hash(&self.key, payload.as_bytes());
        if presented != expected {
            return Err(AuthError::InvalidToken);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::InvalidToken)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| AuthError::InvalidToken)?;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(claims.sub)
    }
}

/// The authenticated caller, extracted from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenSigner: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let signer = TokenSigner::from_ref(state);
        match signer.verify(token, Utc::now()) {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                Err(e.into())
            }
        }
    }
}
