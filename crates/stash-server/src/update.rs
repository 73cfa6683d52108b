//! One-shot release check at startup.
//!
//! The result is computed once and handed to the page renderer; it never
//! changes while the server runs.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Latest-release endpoint queried when `STASH_RELEASES_URL` is unset.
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/stash-rs/stash/releases/latest";

/// Version of the running server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, PartialEq)]
pub enum UpdateStatus {
    /// The check was turned off.
    #[default]
    Disabled,
    /// Running the latest published release.
    Current,
    /// A newer release exists.
    Available { version: String, url: String },
    /// The release endpoint could not be reached or parsed.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    html_url: String,
}

/// Ask `releases_url` for the latest release and compare it to `current`.
pub async fn check(releases_url: &str, current: &str) -> UpdateStatus {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .user_agent(concat!("stash/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "could not build update-check client");
            return UpdateStatus::Unknown;
        }
    };

    let release = match fetch(&client, releases_url).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, url = releases_url, "update check failed");
            return UpdateStatus::Unknown;
        }
    };

    if is_newer(&release.tag_name, current) {
        info!(
            version = %release.tag_name,
            url = %release.html_url,
            "a newer release is available"
        );
        UpdateStatus::Available {
            version: release.tag_name,
            url: release.html_url,
        }
    } else {
        debug!(latest = %release.tag_name, "running the latest release");
        UpdateStatus::Current
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Release, reqwest::Error> {
    client.get(url).send().await?.error_for_status()?.json().await
}

/// True when `candidate` is a strictly higher dotted version than `current`.
/// A leading `v` is ignored; missing components count as zero.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let a = parse_version(candidate);
    let b = parse_version(current);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    false
}

fn parse_version(s: &str) -> Vec<u64> {
    s.trim()
        .trim_start_matches(['v', 'V'])
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}
