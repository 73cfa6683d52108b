use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue},
    routing::post,
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::{AuthGate, Principal},
    config::Config,
    handlers::{browse, login, upload},
    password::Argon2Passwords,
    update::{self, UpdateStatus, VERSION},
    AppState,
};

/// Response header carrying the server version.
pub const VERSION_HEADER: &str = "stash-version";

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub serve_root: PathBuf,
    pub principal: Principal,
    pub login_required_for_read: bool,
    pub max_upload_bytes: usize,
    pub check_for_updates: bool,
    /// Latest-release endpoint (`$STASH_RELEASES_URL`).
    pub releases_url: String,
}

impl ServerConfig {
    /// Build from the persisted config; host and release URL come from the environment.
    pub fn from_config(config: Config) -> Self {
        Self {
            host: std::env::var("STASH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: config.port,
            serve_root: config.serve,
            principal: Principal {
                username: config.username,
                password_hash: config.password,
                secret: config.secret,
            },
            login_required_for_read: config.login_required_for_read,
            max_upload_bytes: config.max_upload_bytes,
            check_for_updates: config.check_for_updates,
            releases_url: std::env::var("STASH_RELEASES_URL")
                .unwrap_or_else(|_| update::DEFAULT_RELEASES_URL.into()),
        }
    }
}

/// Assemble the HTTP surface. `POST /login` and `POST /upload` are routed;
/// every other method and path lands on the browser.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/login", post(login).fallback(browse))
        .route("/upload", post(upload).fallback(browse))
        .fallback(browse)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(VERSION),
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    std::fs::create_dir_all(&cfg.serve_root)
        .with_context(|| format!("create serve dir: {}", cfg.serve_root.display()))?;
    let serve_root = cfg
        .serve_root
        .canonicalize()
        .with_context(|| format!("resolve serve dir: {}", cfg.serve_root.display()))?;
    info!(serve = %serve_root.display(), "serving directory");

    let update_status = if cfg.check_for_updates {
        update::check(&cfg.releases_url, VERSION).await
    } else {
        UpdateStatus::Disabled
    };

    if cfg.login_required_for_read {
        info!("login required for read access");
    }

    let state = AppState {
        gate: Arc::new(AuthGate::new(cfg.principal, Arc::new(Argon2Passwords))),
        serve_root: Arc::new(serve_root),
        login_required_for_read: cfg.login_required_for_read,
        update: Arc::new(update_status),
    };

    let app = router(state, cfg.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, version = VERSION, "stash server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::password::hash_password;
    use crate::token;

    const SECRET: &str = "router-test-secret";
    const BOUNDARY: &str = "stash-test-boundary";

    struct Harness {
        dir: TempDir,
        app: Router,
    }

    fn harness(login_required_for_read: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            gate: Arc::new(AuthGate::new(
                Principal {
                    username: "alice".into(),
                    password_hash: hash_password("s3cret").unwrap(),
                    secret: SECRET.into(),
                },
                Arc::new(Argon2Passwords),
            )),
            serve_root: Arc::new(dir.path().to_path_buf()),
            login_required_for_read,
            update: Arc::new(UpdateStatus::Disabled),
        };
        Harness {
            app: router(state, 1024 * 1024),
            dir,
        }
    }

    fn token() -> String {
        token::issue(SECRET.as_bytes()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(resp: Response) -> Value {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    fn get_json(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap()
    }

    fn raw_upload(filename: &str, data: &'static [u8], token: Option<&str>) -> Request<Body> {
        let mut req = Request::post(format!("/upload?filename={filename}"))
            .header(header::CONTENT_TYPE, "application/octet-stream");
        if let Some(t) = token {
            req = req.header("stash-token", t);
        }
        req.body(Body::from(data)).unwrap()
    }

    fn multipart_body(path: &str, files: &[(&str, &str)]) -> String {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{path}\r\n"
        );
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"uploadfiles\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn multipart_upload(path: &str, files: &[(&str, &str)], token: &str) -> Request<Body> {
        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::COOKIE, format!("token={token}"))
            .body(Body::from(multipart_body(path, files)))
            .unwrap()
    }

    // ── Browse ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_path_is_404_with_path() {
        let h = harness(false);
        let resp = send(&h.app, get_json("/missing.txt")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_json(resp).await, json!({"path": "/missing.txt"}));
    }

    #[tokio::test]
    async fn anonymous_listing_is_unauthorized_flagged() {
        let h = harness(false);
        std::fs::create_dir(h.dir.path().join("reports")).unwrap();
        std::fs::write(h.dir.path().join("reports/q1.csv"), b"a,b").unwrap();
        std::fs::create_dir(h.dir.path().join("reports/old")).unwrap();

        let resp = send(&h.app, get_json("/reports")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["name"], "reports");
        assert_eq!(body["path"], "/reports");
        assert_eq!(body["authorized"], false);

        let mut entries: Vec<(String, u64, bool)> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e["name"].as_str().unwrap().to_string(),
                    e["size"].as_u64().unwrap(),
                    e["is_directory"].as_bool().unwrap(),
                )
            })
            .collect();
        entries.sort();
        assert_eq!(
            entries,
            vec![("old".into(), 0, true), ("q1.csv".into(), 3, false)]
        );
    }

    #[tokio::test]
    async fn authorized_listing_via_header() {
        let h = harness(false);
        let req = Request::get("/")
            .header(header::ACCEPT, "application/json")
            .header("stash-token", token())
            .body(Body::empty())
            .unwrap();
        let body = body_json(send(&h.app, req).await).await;
        assert_eq!(body["name"], "/");
        assert_eq!(body["authorized"], true);
    }

    #[tokio::test]
    async fn html_listing_offers_login_form() {
        let h = harness(false);
        let req = Request::get("/")
            .header(header::ACCEPT, "text/html")
            .body(Body::empty())
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(html.contains(r#"action="/login""#));
    }

    #[tokio::test]
    async fn xml_listing() {
        let h = harness(false);
        let req = Request::get("/")
            .header(header::ACCEPT, "application/xml")
            .body(Body::empty())
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/xml");
        let xml = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(xml.starts_with("<DirectoryListing>"));
        assert!(xml.contains("<authorized>false</authorized>"));
    }

    #[tokio::test]
    async fn login_required_for_read_rejects_anonymous() {
        let h = harness(true);
        let resp = send(&h.app, get_json("/")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["error"], "not authenticated");

        let req = Request::get("/")
            .header(header::ACCEPT, "application/json")
            .header(header::COOKIE, format!("token={}", token()))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.app, req).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn traversal_in_url_stays_inside_root() {
        let h = harness(false);
        std::fs::write(h.dir.path().join("inside.txt"), b"ok").unwrap();
        let resp = send(&h.app, get_json("/%2e%2e/%2e%2e/inside.txt")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["path"], "/inside.txt");
    }

    #[tokio::test]
    async fn nul_in_path_is_404() {
        let h = harness(false);
        let resp = send(&h.app, get_json("/a%00b")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["path"], "/a\0b");
    }

    #[tokio::test]
    async fn raw_download_streams_bytes() {
        let h = harness(false);
        std::fs::write(h.dir.path().join("notes.txt"), b"hello world").unwrap();
        let resp = send(
            &h.app,
            Request::get("/notes.txt").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_bytes(resp).await, b"hello world");
    }

    #[tokio::test]
    async fn unsupported_method_is_405() {
        let h = harness(false);
        for (method, uri) in [("PUT", "/"), ("DELETE", "/x"), ("GET", "/login"), ("PATCH", "/upload")] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap();
            let resp = send(&h.app, req).await;
            if method == "GET" {
                // GET /login browses a (missing) path named "login".
                assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            } else {
                assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
            }
        }
    }

    #[tokio::test]
    async fn every_response_carries_version() {
        let h = harness(false);
        let resp = send(&h.app, get_json("/nope")).await;
        assert_eq!(resp.headers()[VERSION_HEADER], VERSION);
        let resp = send(&h.app, raw_upload("a.txt", b"x", None)).await;
        assert_eq!(resp.headers()[VERSION_HEADER], VERSION);
    }

    // ── Login ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn json_login_returns_token() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Body::from(r#"{"username":"alice","password":"s3cret"}"#))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let token = body["token"].as_str().unwrap();
        assert!(token::verify(token, SECRET.as_bytes()).is_ok());
    }

    #[tokio::test]
    async fn xml_login_returns_token() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/xml")
            .header(header::ACCEPT, "application/xml")
            .body(Body::from(
                "<LoginRequest><username>alice</username><password>s3cret</password></LoginRequest>",
            ))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let xml = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(xml.starts_with("<LoginSuccess><token>"));
    }

    #[tokio::test]
    async fn form_login_sets_cookie_and_redirects() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "text/html")
            .body(Body::from("username=alice&password=s3cret&redirectTo=%2Fdocs"))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/docs");
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("token="));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=2678400"));
    }

    #[tokio::test]
    async fn form_login_redirect_keeps_literal_percent() {
        let h = harness(false);
        std::fs::create_dir(h.dir.path().join("a%20b")).unwrap();
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(
                "username=alice&password=s3cret&redirectTo=%2Fa%2520b",
            ))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert_eq!(location, "/a%2520b");

        let resp = send(&h.app, get_json(&location)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["path"], "/a%20b");
    }

    #[tokio::test]
    async fn form_login_ignores_foreign_redirect() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(
                "username=alice&password=s3cret&redirectTo=https%3A%2F%2Fevil.example",
            ))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn wrong_password_is_400_login_failure() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Body::from(r#"{"username":"alice","password":"wrong"}"#))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "invalid username or password");
        assert_eq!(body["redirect_path"], "");
    }

    #[tokio::test]
    async fn login_with_unknown_content_type_is_415() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::ACCEPT, "application/json")
            .body(Body::from("alice:s3cret"))
            .unwrap();
        assert_eq!(
            send(&h.app, req).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[tokio::test]
    async fn malformed_login_body_is_400() {
        let h = harness(false);
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        assert_eq!(send(&h.app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    // ── Upload ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_without_token_is_401() {
        let h = harness(false);
        let resp = send(&h.app, raw_upload("a.txt", b"x", None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!h.dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn raw_upload_then_describe() {
        let h = harness(false);
        let t = token();
        let resp = send(&h.app, raw_upload("notes/today.txt", b"twelve bytes", Some(&t))).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(body_bytes(resp).await.is_empty());

        let body = body_json(send(&h.app, get_json("/notes/today.txt")).await).await;
        assert_eq!(body["name"], "today.txt");
        assert_eq!(body["size"], 12);
    }

    #[tokio::test]
    async fn uploading_twice_keeps_latest() {
        let h = harness(false);
        let t = token();
        let first = send(&h.app, raw_upload("same.txt", b"first", Some(&t))).await;
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = send(&h.app, raw_upload("same.txt", b"second!", Some(&t))).await;
        assert_eq!(second.status(), StatusCode::ACCEPTED);
        assert_eq!(std::fs::read(h.dir.path().join("same.txt")).unwrap(), b"second!");
    }

    #[tokio::test]
    async fn raw_upload_without_filename_is_400() {
        let h = harness(false);
        let req = Request::post("/upload")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::ACCEPT, "application/json")
            .header("stash-token", token())
            .body(Body::from("data"))
            .unwrap();
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "missing filename");
    }

    #[tokio::test]
    async fn upload_with_unknown_content_type_is_415() {
        let h = harness(false);
        let req = Request::post("/upload?filename=a.txt")
            .header(header::CONTENT_TYPE, "text/plain")
            .header("stash-token", token())
            .body(Body::from("data"))
            .unwrap();
        assert_eq!(
            send(&h.app, req).await.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[tokio::test]
    async fn multipart_upload_redirects_to_directory() {
        let h = harness(false);
        let req = multipart_upload(
            "/reports",
            &[("q3.pdf", "pdf-bytes"), ("q4.pdf", "more")],
            &token(),
        );
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/reports");
        assert_eq!(
            std::fs::read(h.dir.path().join("reports/q3.pdf")).unwrap(),
            b"pdf-bytes"
        );
        assert!(h.dir.path().join("reports/q4.pdf").exists());
    }

    #[tokio::test]
    async fn multipart_redirect_reaches_percent_named_directory() {
        let h = harness(false);
        let req = multipart_upload("/a%20b", &[("x.txt", "hi")], &token());
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(std::fs::read(h.dir.path().join("a%20b/x.txt")).unwrap(), b"hi");

        let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert_eq!(location, "/a%2520b");
        let resp = send(&h.app, get_json(&location)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["path"], "/a%20b");
        assert_eq!(body["entries"][0]["name"], "x.txt");
    }

    #[tokio::test]
    async fn multipart_relative_path_redirects_absolute() {
        let h = harness(false);
        let resp = send(&h.app, multipart_upload("reports/./q", &[("a.txt", "a")], &token())).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/reports/q");
        assert!(h.dir.path().join("reports/q/a.txt").exists());
    }

    #[tokio::test]
    async fn multipart_escape_writes_nothing() {
        let h = harness(false);
        let outside = h.dir.path().parent().unwrap().join("passwd");
        let req = multipart_upload("../../etc", &[("passwd", "owned")], &token());
        let resp = send(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!outside.exists());
        assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn raw_escape_is_rejected() {
        let h = harness(false);
        let t = token();
        let resp = send(&h.app, raw_upload("..%2Fescape.txt", b"x", Some(&t))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!h.dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let h = harness(false);
        let big: &'static [u8] = Box::leak(vec![0u8; 2 * 1024 * 1024].into_boxed_slice());
        let resp = send(&h.app, raw_upload("big.bin", big, Some(&token()))).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!h.dir.path().join("big.bin").exists());
    }
}
