//! Content negotiation and document encoding.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::update::UpdateStatus;

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Representation selected from the `Accept` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Nothing recognised. Files are served as bytes; documents fall back to HTML.
    #[default]
    Raw,
    Html,
    Json,
    Xml,
}

impl ResponseFormat {
    /// First recognised media type in a comma-separated `Accept` value wins.
    /// Parameters such as `;q=0.9` are ignored.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Self::Raw;
        };
        for entry in accept.split(',') {
            let media = entry.split(';').next().unwrap_or("").trim();
            let format = match media.to_ascii_lowercase().as_str() {
                "text/html" => Self::Html,
                "application/json" | "text/json" => Self::Json,
                "application/xml" | "text/xml" => Self::Xml,
                _ => continue,
            };
            return format;
        }
        Self::Raw
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::negotiate(
            headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok()),
        )
    }

    /// JSON or XML, i.e. a programmatic client.
    pub fn is_api(self) -> bool {
        matches!(self, Self::Json | Self::Xml)
    }
}

impl<S> FromRequestParts<S> for ResponseFormat
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// A response body that can be written as HTML, JSON or XML.
pub trait Document: Serialize {
    /// Root element name for the XML representation.
    const XML_ROOT: &'static str;

    fn to_html(&self, update: &UpdateStatus) -> String;
}

/// Encode `doc` in `format` with the matching `content-type`.
///
/// Serialization failures are logged and reported as a bare 500.
pub fn encode<D: Document>(
    status: StatusCode,
    format: ResponseFormat,
    doc: &D,
    update: &UpdateStatus,
) -> Response {
    let encoded = match format {
        ResponseFormat::Raw | ResponseFormat::Html => Ok((CONTENT_TYPE_HTML, doc.to_html(update))),
        ResponseFormat::Json => serde_json::to_string(doc)
            .map(|body| (CONTENT_TYPE_JSON, body))
            .map_err(anyhow::Error::from),
        ResponseFormat::Xml => quick_xml::se::to_string_with_root(D::XML_ROOT, doc)
            .map(|body| (CONTENT_TYPE_XML, body))
            .map_err(anyhow::Error::from),
    };

    match encoded {
        Ok((content_type, body)) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, root = D::XML_ROOT, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
