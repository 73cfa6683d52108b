use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::{
    auth::{safe_redirect_target, session_cookie, AuthError, Authenticated, Credentials},
    error::ApiError,
    format::{encode, ResponseFormat},
    listing::{self, Resource},
    pages::{LoginFailure, LoginSuccess},
    paths,
    upload::{self, MultipartUpload, PendingFile, UploadError, UploadKind},
    AppState,
};

// ── Browse ───────────────────────────────────────────────────────────────────

/// Directory listings and file downloads. Also the fallback for every
/// method on `/login` and `/upload` other than `POST`.
pub async fn browse(
    State(state): State<AppState>,
    format: ResponseFormat,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    match serve_path(&state, format, method, uri.path(), &headers).await {
        Ok(resp) => resp,
        Err(e) => e.respond(format, &state.update),
    }
}

async fn serve_path(
    state: &AppState,
    format: ResponseFormat,
    method: Method,
    raw_path: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    if method != Method::GET {
        return Err(ApiError::MethodNotAllowed(method));
    }

    let authorized = match state.gate.check_authenticated(headers) {
        Ok(_) => true,
        Err(e) => {
            debug!(reason = %e, "browsing anonymously");
            false
        }
    };
    if state.login_required_for_read && !authorized {
        info!(path = raw_path, "read refused: login required");
        return Err(ApiError::Unauthorized);
    }

    let logical = paths::clean_logical(raw_path);
    let physical = match paths::resolve(&state.serve_root, &logical) {
        Ok(p) => p,
        Err(_) => return Err(ApiError::NotFound(logical)),
    };

    let resource = listing::stat(&physical)
        .await
        .with_context(|| format!("stat {}", physical.display()))?;

    match resource {
        None => Err(ApiError::NotFound(logical)),
        Some(Resource::Directory(meta)) => {
            let mut dir = listing::read_directory(&physical, &logical, &meta)
                .await
                .with_context(|| format!("read directory {}", physical.display()))?;
            dir.authorized = authorized;
            Ok(encode(StatusCode::OK, format, &dir, &state.update))
        }
        Some(Resource::File(meta)) if format == ResponseFormat::Raw => {
            let file = tokio::fs::File::open(&physical)
                .await
                .with_context(|| format!("open {}", physical.display()))?;
            let body = Body::from_stream(ReaderStream::new(file));
            Ok((
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(listing::content_type_for(&physical)),
                    ),
                    (header::CONTENT_LENGTH, HeaderValue::from(meta.len())),
                ],
                body,
            )
                .into_response())
        }
        Some(Resource::File(meta)) => {
            let desc = listing::describe_file(&logical, &meta);
            Ok(encode(StatusCode::OK, format, &desc, &state.update))
        }
    }
}

// ── Login ────────────────────────────────────────────────────────────────────

pub async fn login(
    State(state): State<AppState>,
    format: ResponseFormat,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let creds = match parse_credentials(&headers, &body) {
        Ok(c) => c,
        Err(e) => return e.respond(format, &state.update),
    };

    match state.gate.login(&creds) {
        Ok(token) => {
            info!("login successful");
            if format.is_api() {
                encode(StatusCode::OK, format, &LoginSuccess { token }, &state.update)
            } else {
                let jar = CookieJar::new().add(session_cookie(token));
                let location = redirect_location(&creds.redirect_to);
                (StatusCode::FOUND, jar, [(header::LOCATION, location)]).into_response()
            }
        }
        Err(AuthError::InvalidCredentials) => {
            warn!("login failed: invalid credentials");
            let doc = LoginFailure {
                redirect_path: creds.redirect_to,
                error: AuthError::InvalidCredentials.to_string(),
            };
            encode(StatusCode::BAD_REQUEST, format, &doc, &state.update)
        }
        Err(e) => ApiError::from(e).respond(format, &state.update),
    }
}

/// Percent-encoded local path for a `Location` header. `logical` is already
/// decoded, so it is only tidied here.
fn redirect_location(logical: &str) -> String {
    paths::encode_logical(&paths::tidy_logical(safe_redirect_target(logical)))
}

/// Decode a login body according to its `content-type`.
fn parse_credentials(headers: &HeaderMap, body: &[u8]) -> Result<Credentials, ApiError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let media = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

    match media.as_str() {
        "application/x-www-form-urlencoded" => serde_urlencoded::from_bytes(body).map_err(malformed),
        "application/json" | "text/json" => serde_json::from_slice(body).map_err(malformed),
        "application/xml" | "text/xml" => {
            let text = std::str::from_utf8(body).map_err(malformed)?;
            quick_xml::de::from_str(text).map_err(malformed)
        }
        _ => Err(ApiError::UnsupportedMediaType(raw.to_string())),
    }
}

fn malformed(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("malformed login request: {e}"))
}

// ── Upload ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

/// `POST /upload`. Always requires a token, whatever the read policy.
pub async fn upload(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    format: ResponseFormat,
    request: Request,
) -> Response {
    match ingest(&state, request).await {
        Ok(resp) => resp,
        Err(e) => {
            if !matches!(e, ApiError::Internal(_)) {
                warn!(error = %e, "upload rejected");
            }
            e.respond(format, &state.update)
        }
    }
}

async fn ingest(state: &AppState, request: Request) -> Result<Response, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match UploadKind::from_content_type(content_type.as_deref())? {
        UploadKind::Multipart => {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            let MultipartUpload { upload_path, files } =
                upload::read_multipart(multipart, &state.serve_root).await?;
            let batch = upload::plan_batch(&state.serve_root, &upload_path, files)?;
            let count = batch.len();
            upload::write_batch(batch).await?;
            info!(files = count, path = %upload_path, "multipart upload stored");

            let location = redirect_location(&paths::tidy_logical(&upload_path));
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
        UploadKind::Raw => {
            let params: UploadParams = serde_urlencoded::from_str(request.uri().query().unwrap_or(""))
                .map_err(|e| ApiError::BadRequest(format!("invalid query: {e}")))?;
            let filename = params
                .filename
                .filter(|f| !f.is_empty())
                .ok_or(UploadError::MissingFilename)?;
            let target = upload::plan_target(&state.serve_root, "/", &filename)?;
            let data = Bytes::from_request(request, state).await.map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ApiError::from(UploadError::TooLarge)
                } else {
                    ApiError::BadRequest(e.body_text())
                }
            })?;
            upload::write_batch(vec![PendingFile {
                target,
                data: data.into(),
            }])
            .await?;
            Ok(StatusCode::ACCEPTED.into_response())
        }
    }
}
