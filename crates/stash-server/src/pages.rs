//! HTML pages and the small response documents.
//!
//! Templates use `{name}` placeholders filled in a single pass by [`render`],
//! so substituted values are never re-scanned for placeholders.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::format::Document;
use crate::listing::{DirectoryListing, FileDescriptor};
use crate::paths::encode_logical;
use crate::update::UpdateStatus;

// ── Templates ────────────────────────────────────────────────────────────────

/// Placeholders: `{title}`, `{body}`.
pub const LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8" />
<title>{title}</title>
</head>
<body>
{body}
</body>
</html>"#;

/// Placeholders: `{path}`, `{name}`, `{modified}`, `{rows}`, `{banner}`, `{form}`.
pub const DIRECTORY: &str = r#"{banner}<h1><a href="{path}">{name}</a> <small>last modified: {modified}</small></h1>
<hr />
<table>
    <thead>
        <tr>
            <th>Name</th>
            <th>Size</th>
            <th>Last modified</th>
        </tr>
    </thead>
    <tbody>
{rows}
    </tbody>
</table>
<hr />
{form}"#;

/// Placeholders: `{path}`, `{name}`, `{size}`, `{modified}`.
pub const DIRECTORY_ROW: &str = r#"        <tr>
            <td><a href="{path}">{name}</a></td>
            <td>{size}</td>
            <td>{modified}</td>
        </tr>"#;

pub const DIRECTORY_EMPTY_ROW: &str = r#"        <tr>
            <td colspan="3">No entries</td>
        </tr>"#;

/// Placeholders: `{redirect}`.
pub const LOGIN_FORM: &str = r#"<h2>Login</h2>
<form action="/login" method="post">
    <label for="usernameInput">Username</label>
    <input name="username" id="usernameInput" type="text" required />
    <label for="passwordInput">Password</label>
    <input name="password" id="passwordInput" type="password" required />
    <input type="hidden" name="redirectTo" value="{redirect}" />
    <button type="submit">Login</button>
</form>"#;

/// Placeholders: `{path}`.
pub const UPLOAD_FORM: &str = r#"<form enctype="multipart/form-data" id="uploadFilesForm" action="/upload" method="post">
    <input type="file" multiple="multiple" name="uploadfiles" />
    <input type="hidden" name="path" value="{path}" />
    <button type="submit">Upload</button>
</form>"#;

/// Placeholders: `{version}`, `{url}`.
pub const UPDATE_BANNER: &str =
    r#"<p class="update">Stash {version} is available: <a href="{url}">{url}</a></p>
"#;

/// Placeholders: `{path}`, `{name}`, `{size}`, `{modified}`.
pub const FILE: &str = r#"<h1><a href="{path}" download>{name}</a></h1>
<hr />
<table>
    <tbody>
    <tr><th>Name:</th><td>{name}</td></tr>
    <tr><th>Size:</th><td>{size}</td></tr>
    <tr><th>Last modification:</th><td>{modified}</td></tr>
    </tbody>
</table>
<hr />"#;

/// Placeholders: `{error}`, `{form}`.
pub const LOGIN_FAILED: &str = r#"<p style="color: red">Login failed: {error}</p>
{form}"#;

/// Placeholders: `{error}`.
pub const CLIENT_ERROR: &str = r#"<h1>Invalid request</h1>
<pre>{error}</pre>"#;

/// Placeholders: `{path}`.
pub const NOT_FOUND: &str = r#"<h1>Not found</h1>
<p>Unable to find requested resource: {path}</p>"#;

/// Placeholders: `{error}`.
pub const INTERNAL_ERROR: &str = r#"<h1>Internal Server Error</h1>
<p>Something went wrong when processing the request:</p>
<pre>{error}</pre>"#;

/// Placeholders: `{token}`.
pub const LOGIN_SUCCESS: &str = r#"<h1>Logged in</h1>
<pre>{token}</pre>"#;

// ── Rendering helpers ────────────────────────────────────────────────────────

/// Escape text for HTML element content and quoted attribute values.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Substitute `{key}` placeholders. Unknown placeholders are left as-is.
/// Values are inserted verbatim; escape them first.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn page(title: &str, body: &str) -> String {
    render(LAYOUT, &[("title", &escape_html(title)), ("body", body)])
}

fn href(logical: &str) -> String {
    escape_html(&encode_logical(logical))
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn login_form(redirect: &str) -> String {
    render(LOGIN_FORM, &[("redirect", &escape_html(redirect))])
}

fn update_banner(update: &UpdateStatus) -> String {
    match update {
        UpdateStatus::Available { version, url } => render(
            UPDATE_BANNER,
            &[("version", &escape_html(version)), ("url", &escape_html(url))],
        ),
        _ => String::new(),
    }
}

// ── Documents ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginSuccess {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginFailure {
    pub redirect_path: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientError {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotFound {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalError {
    pub error: String,
}

impl Document for DirectoryListing {
    const XML_ROOT: &'static str = "DirectoryListing";

    fn to_html(&self, update: &UpdateStatus) -> String {
        let rows = if self.entries.is_empty() {
            DIRECTORY_EMPTY_ROW.to_string()
        } else {
            self.entries
                .iter()
                .map(|e| {
                    let size = if e.is_directory {
                        "&lt;Dir&gt;".to_string()
                    } else {
                        e.size.to_string()
                    };
                    render(
                        DIRECTORY_ROW,
                        &[
                            ("path", &href(&e.path)),
                            ("name", &escape_html(&e.name)),
                            ("size", &size),
                            ("modified", &timestamp(&e.last_modification_time)),
                        ],
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let form = if self.authorized {
            render(UPLOAD_FORM, &[("path", &escape_html(&self.path))])
        } else {
            login_form(&self.path)
        };

        let body = render(
            DIRECTORY,
            &[
                ("banner", &update_banner(update)),
                ("path", &href(&self.path)),
                ("name", &escape_html(&self.name)),
                ("modified", &timestamp(&self.last_modification_time)),
                ("rows", &rows),
                ("form", &form),
            ],
        );
        page(&self.path, &body)
    }
}

impl Document for FileDescriptor {
    const XML_ROOT: &'static str = "FileDescriptor";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        let body = render(
            FILE,
            &[
                ("path", &href(&self.path)),
                ("name", &escape_html(&self.name)),
                ("size", &self.size.to_string()),
                ("modified", &timestamp(&self.last_modification_time)),
            ],
        );
        page(&self.name, &body)
    }
}

impl Document for LoginSuccess {
    const XML_ROOT: &'static str = "LoginSuccess";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        page(
            "Logged in",
            &render(LOGIN_SUCCESS, &[("token", &escape_html(&self.token))]),
        )
    }
}

impl Document for LoginFailure {
    const XML_ROOT: &'static str = "LoginFailure";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        let body = render(
            LOGIN_FAILED,
            &[
                ("error", &escape_html(&self.error)),
                ("form", &login_form(&self.redirect_path)),
            ],
        );
        page("Login failed", &body)
    }
}

impl Document for ClientError {
    const XML_ROOT: &'static str = "ClientError";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        page(
            "Invalid request",
            &render(CLIENT_ERROR, &[("error", &escape_html(&self.error))]),
        )
    }
}

impl Document for NotFound {
    const XML_ROOT: &'static str = "NotFound";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        page(
            "Not found",
            &render(NOT_FOUND, &[("path", &escape_html(&self.path))]),
        )
    }
}

impl Document for InternalError {
    const XML_ROOT: &'static str = "InternalError";

    fn to_html(&self, _update: &UpdateStatus) -> String {
        page(
            "Internal Server Error",
            &render(INTERNAL_ERROR, &[("error", &escape_html(&self.error))]),
        )
    }
}
