pub mod auth;
pub mod config;
pub mod dirs;
pub mod error;
pub mod format;
pub mod handlers;
pub mod listing;
pub mod pages;
pub mod password;
pub mod paths;
pub mod server;
pub mod token;
pub mod update;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<auth::AuthGate>,
    /// Canonical directory exposed over HTTP.
    pub serve_root: Arc<PathBuf>,
    /// Refuse anonymous GETs when set.
    pub login_required_for_read: bool,
    /// Outcome of the startup release check.
    pub update: Arc<update::UpdateStatus>,
}

pub use config::Config;
pub use server::{router, run, ServerConfig};
