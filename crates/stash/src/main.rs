use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde_json::Value;
use stash_server::{
    auth::TOKEN_HEADER,
    config::{Config, Overrides},
    listing::{DirectoryListing, FileDescriptor},
    paths::encode_logical,
};
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stash", about = "Stash: a small self-hosted file server", version)]
struct Cli {
    /// Stash server URL (default: http://localhost:8080 or $STASH_SERVER)
    #[arg(long, env = "STASH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Token from `stash login` ($STASH_TOKEN)
    #[arg(long, env = "STASH_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Stash HTTP server
    Serve {
        /// Config file (default: $STASH_CONFIG or the platform config dir)
        #[arg(long, env = "STASH_CONFIG")]
        config: Option<PathBuf>,
        /// Write the given options to the config file and exit
        #[arg(long)]
        persist: bool,
        /// Username of the single account
        #[arg(long)]
        username: Option<String>,
        /// Password of the single account (stored hashed)
        #[arg(long)]
        password: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Directory to serve
        #[arg(long)]
        serve: Option<PathBuf>,
        /// Require login for listings and downloads
        #[arg(long)]
        login_required_for_read: bool,
        /// Skip the startup release check
        #[arg(long)]
        no_update_check: bool,
    },
    /// Print an Argon2 hash for the config file's `password` field
    HashPassword {
        plaintext: String,
    },
    /// Log in and print a token
    Login {
        #[arg(long)]
        username: String,
        /// Password ($STASH_PASSWORD)
        #[arg(long, env = "STASH_PASSWORD")]
        password: String,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show details of a file or directory
    Stat {
        path: String,
    },
    /// Upload local files
    Upload {
        /// Local files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Remote directory
        #[arg(long, default_value = "/")]
        to: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STASH_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            config,
            persist,
            username,
            password,
            port,
            serve,
            login_required_for_read,
            no_update_check,
        } => {
            let overrides = Overrides {
                username,
                password,
                port,
                serve,
                login_required_for_read,
            };
            cmd_serve(config, overrides, persist, no_update_check).await
        }

        Commands::HashPassword { plaintext } => {
            println!("{}", stash_server::password::hash_password(&plaintext)?);
            Ok(())
        }

        Commands::Login { username, password } => {
            cmd_login(&cli.server, &username, &password).await
        }

        Commands::Ls { path } => cmd_ls(&cli.server, cli.token.as_deref(), &path).await,

        Commands::Stat { path } => cmd_stat(&cli.server, cli.token.as_deref(), &path).await,

        Commands::Upload { files, to } => {
            let token = require_token(&cli.token)?;
            cmd_upload(&cli.server, &token, &files, &to).await
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(
    config_path: Option<PathBuf>,
    overrides: Overrides,
    persist: bool,
    no_update_check: bool,
) -> Result<()> {
    let config_path = match config_path {
        Some(p) => p,
        None => stash_server::dirs::config_path()?,
    };
    let mut config = Config::load_or_init(&config_path, stash_server::dirs::default_serve_dir()?)?;
    config.apply(overrides)?;

    if persist {
        config.save(&config_path)?;
        println!(
            "updated {}. Start stash without --persist to serve.",
            config_path.display()
        );
        return Ok(());
    }

    if no_update_check {
        config.check_for_updates = false;
    }

    stash_server::run(stash_server::ServerConfig::from_config(config)).await
}

async fn cmd_login(server: &str, username: &str, password: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/login", server.trim_end_matches('/')))
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&serde_json::json!({
            "username": username,
            "password": password,
        }))
        .send()
        .await
        .context("HTTP request failed")?;

    let json = read_json(resp).await?;
    let token = json["token"]
        .as_str()
        .context("server response has no token")?;
    println!("{token}");
    Ok(())
}

async fn cmd_ls(server: &str, token: Option<&str>, path: &str) -> Result<()> {
    let json = fetch_json(server, token, path).await?;
    if json.get("entries").is_none() {
        anyhow::bail!("{path} is not a directory");
    }
    let listing: DirectoryListing =
        serde_json::from_value(json).context("parse directory listing")?;

    if listing.entries.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for e in &listing.entries {
        let size = if e.is_directory {
            "<dir>".to_string()
        } else {
            e.size.to_string()
        };
        println!(
            "  {:>12}  {}  {}",
            size,
            e.last_modification_time.format("%Y-%m-%d %H:%M"),
            e.name
        );
    }
    Ok(())
}

async fn cmd_stat(server: &str, token: Option<&str>, path: &str) -> Result<()> {
    let json = fetch_json(server, token, path).await?;
    if json.get("entries").is_some() {
        let listing: DirectoryListing =
            serde_json::from_value(json).context("parse directory listing")?;
        println!("name:      {}", listing.name);
        println!("path:      {}", listing.path);
        println!("type:      directory ({} entries)", listing.entries.len());
        println!("modified:  {}", listing.last_modification_time.to_rfc3339());
        println!("can write: {}", listing.authorized);
    } else {
        let file: FileDescriptor = serde_json::from_value(json).context("parse file details")?;
        println!("name:      {}", file.name);
        println!("path:      {}", file.path);
        println!("size:      {}", file.size);
        println!("modified:  {}", file.last_modification_time.to_rfc3339());
    }
    Ok(())
}

async fn cmd_upload(server: &str, token: &str, files: &[PathBuf], to: &str) -> Result<()> {
    let client = Client::new();
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", file.display()))?;
        let target = remote_path(&format!("{}/{name}", to.trim_end_matches('/')));
        upload_one(&client, server, token, file, &target).await?;
        println!("✓ uploaded {target}");
    }
    Ok(())
}

async fn upload_one(
    client: &Client,
    server: &str,
    token: &str,
    file: &Path,
    target: &str,
) -> Result<()> {
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("open {}", file.display()))?;
    let len = handle.metadata().await.map(|m| m.len()).ok();

    let mut req = client
        .post(format!("{}/upload", server.trim_end_matches('/')))
        .query(&[("filename", target)])
        .header(TOKEN_HEADER, token)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream");
    if let Some(len) = len {
        req = req.header(reqwest::header::CONTENT_LENGTH, len);
    }

    let resp = req
        .body(reqwest::Body::wrap_stream(ReaderStream::new(handle)))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        let err = server_error(resp).await;
        return Err(err.context(format!("upload {}", file.display())));
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token / STASH_TOKEN is required for this command (see `stash login`)")
}

/// Absolute remote path with a single leading slash.
fn remote_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn remote_url(server: &str, path: &str) -> String {
    format!(
        "{}{}",
        server.trim_end_matches('/'),
        encode_logical(&remote_path(path))
    )
}

async fn fetch_json(server: &str, token: Option<&str>, path: &str) -> Result<Value> {
    let mut req = Client::new()
        .get(remote_url(server, path))
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(t) = token {
        req = req.header(TOKEN_HEADER, t);
    }
    let resp = req.send().await.context("HTTP request failed")?;
    read_json(resp).await
}

async fn read_json(resp: Response) -> Result<Value> {
    if !resp.status().is_success() {
        return Err(server_error(resp).await);
    }
    resp.json().await.context("parse response")
}

async fn server_error(resp: Response) -> anyhow::Error {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            v["error"]
                .as_str()
                .map(str::to_owned)
                .or_else(|| v["path"].as_str().map(|p| format!("not found: {p}")))
        })
        .unwrap_or(text);
    anyhow::anyhow!("server returned {status}: {detail}")
}
