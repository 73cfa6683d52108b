//! Stateless bearer tokens.
//!
//! Tokens are HS256-signed JWTs keyed by the principal's secret. Nothing is
//! stored server-side, so a token stays valid until `exp` and cannot be
//! revoked early.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token lifetime: 31 days.
pub const TOKEN_LIFETIME_SECS: i64 = 31 * 24 * 60 * 60;

/// Subject payload carried in `sub`. Empty today; reserved for per-user claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    jti: String,
    iat: i64,
    exp: i64,
    sub: String,
}

/// Outcome of checking a presented token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenStatus {
    Valid(Subject),
    Expired,
    Malformed,
    /// Signature does not verify under the secret, or the token was not
    /// signed with HS256.
    SignatureMismatch,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
}

// ── Issue ─────────────────────────────────────────────────────────────────────

/// Issue a fresh token signed with `secret`.
pub fn issue(secret: &[u8]) -> Result<String> {
    issue_at(secret, now())
}

/// Issue a token as if the clock read `issued_at` (unix seconds).
pub fn issue_at(secret: &[u8], issued_at: i64) -> Result<String> {
    let claims = Claims {
        jti: Uuid::new_v4().to_string(),
        iat: issued_at,
        exp: issued_at + TOKEN_LIFETIME_SECS,
        sub: serde_json::to_string(&Subject::default()).context("encode token subject")?,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .context("sign token")
}

// ── Verify ────────────────────────────────────────────────────────────────────

/// Classify `token` against `secret`.
pub fn inspect(token: &str, secret: &[u8]) -> TokenStatus {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = match decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation) {
        Ok(data) => data,
        Err(e) => {
            return match e.kind() {
                ErrorKind::ExpiredSignature => TokenStatus::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenStatus::SignatureMismatch
                }
                _ => TokenStatus::Malformed,
            }
        }
    };

    match serde_json::from_str::<Subject>(&data.claims.sub) {
        Ok(subject) => TokenStatus::Valid(subject),
        Err(_) => TokenStatus::Malformed,
    }
}

/// Verify `token`, returning its subject payload.
pub fn verify(token: &str, secret: &[u8]) -> Result<Subject, TokenError> {
    match inspect(token, secret) {
        TokenStatus::Valid(subject) => Ok(subject),
        TokenStatus::Expired => Err(TokenError::Expired),
        TokenStatus::Malformed | TokenStatus::SignatureMismatch => Err(TokenError::InvalidToken),
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
