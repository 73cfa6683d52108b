use axum::http::{Method, StatusCode};
use axum::response::Response;

use crate::{
    auth::AuthError,
    format::{encode, ResponseFormat},
    pages::{ClientError, InternalError, NotFound},
    paths::PathEscape,
    update::UpdateStatus,
    upload::UploadError,
};

/// Errors surfaced at the HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unsupported method: '{0}'")]
    MethodNotAllowed(Method),
    #[error("unsupported content type: '{0}'")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("not authenticated")]
    Unauthorized,
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as an error document in `format`.
    ///
    /// Internal errors are logged in full and answered with a generic message.
    pub fn respond(self, format: ResponseFormat, update: &UpdateStatus) -> Response {
        let status = self.status_code();
        match self {
            Self::NotFound(path) => encode(status, format, &NotFound { path }, update),
            Self::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), "internal error");
                let doc = InternalError {
                    error: "internal server error".into(),
                };
                encode(status, format, &doc, update)
            }
            other => {
                let doc = ClientError {
                    error: other.to_string(),
                };
                encode(status, format, &doc, update)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NoCredential | AuthError::InvalidToken | AuthError::Expired => {
                Self::Unauthorized
            }
            AuthError::InvalidCredentials => Self::BadRequest(e.to_string()),
            AuthError::Internal(e) => Self::Internal(e),
        }
    }
}

impl From<PathEscape> for ApiError {
    fn from(e: PathEscape) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::PathEscape(e) => e.into(),
            UploadError::MissingFilename => Self::BadRequest(e.to_string()),
            UploadError::Malformed(_) => Self::BadRequest(e.to_string()),
            UploadError::TooLarge => Self::PayloadTooLarge,
            UploadError::UnsupportedMediaType(ct) => Self::UnsupportedMediaType(ct),
            UploadError::Io(e) => Self::Internal(e.into()),
        }
    }
}
