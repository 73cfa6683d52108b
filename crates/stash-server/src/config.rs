//! Persisted server configuration (`config.json`).
//!
//! A missing file is created with defaults on first start. Keys are camelCase.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::password::hash_password;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;
pub const DEFAULT_USERNAME: &str = "username";
pub const DEFAULT_PASSWORD: &str = "password";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub username: String,
    /// Password hash, never the plaintext.
    pub password: String,
    /// Directory exposed over HTTP.
    pub serve: PathBuf,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    /// HMAC key for tokens.
    pub secret: String,
    #[serde(default)]
    pub login_required_for_read: bool,
    #[serde(default = "default_true")]
    pub check_for_updates: bool,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub username: Option<String>,
    /// Plaintext; hashed when applied.
    pub password: Option<String>,
    pub port: Option<u16>,
    pub serve: Option<PathBuf>,
    /// Only ever switches the setting on.
    pub login_required_for_read: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

/// Accept `8080` as well as `"8080"`.
fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Config {
    /// Fresh config with the default credentials and a random secret.
    pub fn generate(serve: PathBuf) -> Result<Self> {
        Ok(Self {
            username: DEFAULT_USERNAME.to_string(),
            password: hash_password(DEFAULT_PASSWORD)?,
            serve,
            port: DEFAULT_PORT,
            secret: generate_secret(),
            login_required_for_read: false,
            check_for_updates: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parse config file: {}", path.display()))?;
        if config.secret.is_empty() {
            anyhow::bail!("config file has an empty secret: {}", path.display());
        }
        Ok(config)
    }

    /// Load `path`, or write a generated config there if it does not exist.
    pub fn load_or_init(path: &Path, default_serve: PathBuf) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), "loading config");
            return Self::load(path);
        }
        info!(path = %path.display(), "config file not found, writing defaults");
        let config = Self::generate(default_serve)?;
        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("write config file: {}", path.display()))?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(username) = overrides.username.filter(|u| !u.is_empty()) {
            self.username = username;
        }
        if let Some(password) = overrides.password.filter(|p| !p.is_empty()) {
            self.password = hash_password(&password)?;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(serve) = overrides.serve {
            self.serve = serve;
        }
        if overrides.login_required_for_read {
            self.login_required_for_read = true;
        }
        Ok(())
    }
}
