//! Directory listings and file descriptors, read fresh from disk per request.

use std::fs::Metadata;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::paths::join_logical;
use crate::upload::SPOOL_PREFIX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Logical path, relative to the serve root.
    pub path: String,
    /// Zero for directories.
    pub size: u64,
    pub is_directory: bool,
    pub last_modification_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub name: String,
    pub path: String,
    pub last_modification_time: DateTime<Utc>,
    pub entries: Vec<DirectoryEntry>,
    /// Whether the request carried valid credentials.
    pub authorized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub last_modification_time: DateTime<Utc>,
}

/// What a physical path turned out to be.
#[derive(Debug)]
pub enum Resource {
    Directory(Metadata),
    File(Metadata),
}

/// Stat `physical`, following symlinks. `Ok(None)` when nothing is there or
/// the name cannot exist (an embedded NUL, for instance).
pub async fn stat(physical: &Path) -> io::Result<Option<Resource>> {
    match fs::metadata(physical).await {
        Ok(meta) if meta.is_dir() => Ok(Some(Resource::Directory(meta))),
        Ok(meta) => Ok(Some(Resource::File(meta))),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// List `physical` in enumeration order. `authorized` is filled in by the caller.
pub async fn read_directory(
    physical: &Path,
    logical: &str,
    meta: &Metadata,
) -> io::Result<DirectoryListing> {
    let mut entries = Vec::new();
    let mut dir = fs::read_dir(physical).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(SPOOL_PREFIX) {
            continue;
        }
        // Follow symlinks; a dangling link is described by the link itself.
        let entry_meta = match fs::metadata(entry.path()).await {
            Ok(m) => m,
            Err(_) => entry.metadata().await?,
        };
        let is_directory = entry_meta.is_dir();
        entries.push(DirectoryEntry {
            path: join_logical(logical, &name),
            name,
            size: if is_directory { 0 } else { entry_meta.len() },
            is_directory,
            last_modification_time: modified(&entry_meta),
        });
    }

    Ok(DirectoryListing {
        name: display_name(logical),
        path: logical.to_string(),
        last_modification_time: modified(meta),
        entries,
        authorized: false,
    })
}

pub fn describe_file(logical: &str, meta: &Metadata) -> FileDescriptor {
    FileDescriptor {
        name: display_name(logical),
        path: logical.to_string(),
        size: meta.len(),
        last_modification_time: modified(meta),
    }
}

/// Last path segment; the root is called `/`.
fn display_name(logical: &str) -> String {
    match logical.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "/".to_string(),
    }
}

fn modified(meta: &Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Content type for raw downloads, guessed from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") | Some("log") | Some("md") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
