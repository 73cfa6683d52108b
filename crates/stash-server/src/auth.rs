use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use constant_time_eq::constant_time_eq;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::ApiError,
    format::ResponseFormat,
    password::PasswordVerifier,
    token::{self, Subject, TokenError, TOKEN_LIFETIME_SECS},
    AppState,
};

/// Request header carrying a bearer token.
pub const TOKEN_HEADER: &str = "stash-token";
/// Cookie carrying a bearer token for browsers.
pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credential presented")]
    NoCredential,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidToken => Self::InvalidToken,
            TokenError::Expired => Self::Expired,
        }
    }
}

/// The single configured account.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    /// PHC-format password hash.
    pub password_hash: String,
    /// HMAC key for issuing and verifying tokens.
    pub secret: String,
}

/// Body of `POST /login`. Browser forms also send `redirectTo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "redirectTo")]
    pub redirect_to: String,
}

/// Decides whether a request is authenticated and exchanges credentials for tokens.
pub struct AuthGate {
    principal: Principal,
    passwords: Arc<dyn PasswordVerifier>,
}

impl AuthGate {
    pub fn new(principal: Principal, passwords: Arc<dyn PasswordVerifier>) -> Self {
        Self {
            principal,
            passwords,
        }
    }

    /// Check the `stash-token` header, falling back to the `token` cookie.
    pub fn check_authenticated(&self, headers: &HeaderMap) -> Result<Subject, AuthError> {
        let token = token_from_headers(headers).ok_or(AuthError::NoCredential)?;
        Ok(token::verify(&token, self.principal.secret.as_bytes())?)
    }

    /// Issue a token if `creds` match the principal.
    ///
    /// A wrong username and a wrong password produce the same error.
    pub fn login(&self, creds: &Credentials) -> Result<String, AuthError> {
        let username_matches = constant_time_eq(
            creds.username.as_bytes(),
            self.principal.username.as_bytes(),
        );
        if !username_matches {
            return Err(AuthError::InvalidCredentials);
        }
        if !self
            .passwords
            .verify(&creds.password, &self.principal.password_hash)?
        {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(token::issue(self.principal.secret.as_bytes())?)
    }
}

/// Bearer token from the request, header first.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(t) = from_header {
        return Some(t.to_owned());
    }
    CookieJar::from_headers(headers)
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|t| !t.is_empty())
}

/// Browser session cookie holding `token`, valid as long as the token.
pub fn session_cookie(token: String) -> Cookie<'static> {
    let lifetime = CookieDuration::seconds(TOKEN_LIFETIME_SECS);
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .max_age(lifetime)
        .expires(OffsetDateTime::now_utc() + lifetime)
        .build()
}

/// Only local absolute paths are followed after login; anything else goes to `/`.
pub fn safe_redirect_target(raw: &str) -> &str {
    let local = raw.starts_with('/')
        && !raw.starts_with("//")
        && !raw.contains('\\')
        && !raw.contains("://")
        && !raw.chars().any(char::is_control);
    if local {
        raw
    } else {
        "/"
    }
}

/// Extractor for routes that require a valid token.
///
/// Rejects with a 401 document in the negotiated format.
pub struct Authenticated(pub Subject);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match state.gate.check_authenticated(&parts.headers) {
            Ok(subject) => Ok(Self(subject)),
            Err(e) => {
                debug!(error = %e, path = %parts.uri.path(), "rejected unauthenticated request");
                let format = ResponseFormat::from_headers(&parts.headers);
                Err(ApiError::from(e).respond(format, &state.update))
            }
        }
    }
}
