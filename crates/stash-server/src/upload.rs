//! Upload ingestion: multipart batches and raw single-file bodies.
//!
//! Every target of a batch is checked against the serve root before any byte
//! is written. A failure halfway through writing is not rolled back.
//!
//! Multipart files above [`SPILL_THRESHOLD`] are spooled to hidden temp files
//! in the serve root while the body is read, then renamed into place.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::paths::{self, PathEscape};

/// Multipart text field naming the target directory.
pub const PATH_FIELD: &str = "path";
/// Multipart file field; may repeat.
pub const FILES_FIELD: &str = "uploadfiles";
/// Files larger than this are kept on disk rather than in memory.
pub const SPILL_THRESHOLD: usize = 1024 * 1024;
/// Name prefix of in-flight spool files. Listings skip these.
pub const SPOOL_PREFIX: &str = ".stash-upload-";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    PathEscape(#[from] PathEscape),
    #[error("missing filename")]
    MissingFilename,
    #[error("malformed upload: {0}")]
    Malformed(String),
    #[error("upload exceeds the size limit")]
    TooLarge,
    #[error(
        "unsupported content type '{0}', expected multipart/form-data or application/octet-stream"
    )]
    UnsupportedMediaType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Multipart,
    Raw,
}

impl UploadKind {
    /// Pick the ingestion mode from a `content-type` value.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, UploadError> {
        let raw = content_type.unwrap_or("");
        let media = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match media.as_str() {
            "multipart/form-data" => Ok(Self::Multipart),
            "application/octet-stream" => Ok(Self::Raw),
            _ => Err(UploadError::UnsupportedMediaType(raw.to_string())),
        }
    }
}

/// A validated destination inside the serve root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub logical: String,
    pub physical: PathBuf,
}

/// File content received but not yet committed.
#[derive(Debug)]
pub enum Staged {
    Memory(Bytes),
    /// Removed on drop unless committed.
    Spooled { file: NamedTempFile, len: u64 },
}

impl Staged {
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(data) => data.len() as u64,
            Self::Spooled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Staged {
    fn from(data: Bytes) -> Self {
        Self::Memory(data)
    }
}

/// Accumulates one file, in memory up to [`SPILL_THRESHOLD`] and in a temp
/// file under `dir` past it.
pub struct Spool<'a> {
    dir: &'a Path,
    buf: Vec<u8>,
    disk: Option<(NamedTempFile, fs::File)>,
    len: u64,
}

impl<'a> Spool<'a> {
    pub fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            buf: Vec::new(),
            disk: None,
            len: 0,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.len += chunk.len() as u64;
        if self.disk.is_none() {
            if self.buf.len() + chunk.len() <= SPILL_THRESHOLD {
                self.buf.extend_from_slice(chunk);
                return Ok(());
            }
            let file = tempfile::Builder::new()
                .prefix(SPOOL_PREFIX)
                .tempfile_in(self.dir)?;
            let mut handle = fs::File::from_std(file.as_file().try_clone()?);
            handle.write_all(&self.buf).await?;
            self.buf = Vec::new();
            debug!(spool = %file.path().display(), "spilling upload to disk");
            self.disk = Some((file, handle));
        }
        if let Some((_, handle)) = self.disk.as_mut() {
            handle.write_all(chunk).await?;
        }
        Ok(())
    }

    pub async fn finish(self) -> Result<Staged, UploadError> {
        match self.disk {
            Some((file, mut handle)) => {
                handle.flush().await?;
                Ok(Staged::Spooled {
                    file,
                    len: self.len,
                })
            }
            None => Ok(Staged::Memory(Bytes::from(self.buf))),
        }
    }
}

#[derive(Debug)]
pub struct PendingFile {
    pub target: UploadTarget,
    pub data: Staged,
}

/// Files read from a multipart body, not yet validated.
#[derive(Debug, Default)]
pub struct MultipartUpload {
    /// Value of the `path` field, `/` when absent.
    pub upload_path: String,
    pub files: Vec<(String, Staged)>,
}

/// Resolve `filename` under `upload_path` within `root`.
pub fn plan_target(root: &Path, upload_path: &str, filename: &str) -> Result<UploadTarget, UploadError> {
    if filename.trim_matches(['/', '\\']).is_empty() {
        return Err(UploadError::MissingFilename);
    }
    let physical = paths::contain(root, &[upload_path, filename])?;
    let root = paths::normalize(root);
    let relative = physical
        .strip_prefix(&root)
        .map_err(|_| PathEscape)?
        .to_string_lossy()
        .replace('\\', "/");
    if relative.is_empty() {
        // Resolves to the serve root itself, e.g. `dir/..`.
        return Err(UploadError::MissingFilename);
    }
    Ok(UploadTarget {
        logical: format!("/{relative}"),
        physical,
    })
}

/// Validate every file of a batch. Nothing is written here.
pub fn plan_batch(
    root: &Path,
    upload_path: &str,
    files: Vec<(String, Staged)>,
) -> Result<Vec<PendingFile>, UploadError> {
    files
        .into_iter()
        .map(|(filename, data)| {
            Ok(PendingFile {
                target: plan_target(root, upload_path, &filename)?,
                data,
            })
        })
        .collect()
}

/// Write a validated batch, creating parent directories and overwriting files.
pub async fn write_batch(files: Vec<PendingFile>) -> Result<(), UploadError> {
    for PendingFile { target, data } in files {
        if let Some(parent) = target.physical.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = data.len();
        match data {
            Staged::Memory(data) => fs::write(&target.physical, &data).await?,
            Staged::Spooled { file, .. } => commit_spool(file, &target.physical).await?,
        }
        info!(path = %target.logical, bytes, "stored upload");
    }
    Ok(())
}

/// Move a spool file onto `dest`, copying when a rename is not possible.
async fn commit_spool(file: NamedTempFile, dest: &Path) -> Result<(), UploadError> {
    match file.persist(dest) {
        Ok(_) => {}
        Err(e) => {
            debug!(error = %e.error, "rename failed, copying spool");
            fs::copy(e.file.path(), dest).await?;
        }
    }
    // Temp files are created owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

/// Drain a multipart body, spooling large files under `spool_dir`.
///
/// Fields other than `path` and `uploadfiles` are skipped.
pub async fn read_multipart(
    mut multipart: Multipart,
    spool_dir: &Path,
) -> Result<MultipartUpload, UploadError> {
    let mut upload = MultipartUpload {
        upload_path: "/".to_string(),
        files: Vec::new(),
    };
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(PATH_FIELD) => {
                let value = field
                    .text()
                    .await
                    .map_err(multipart_error)?;
                if !value.trim().is_empty() {
                    upload.upload_path = value;
                }
            }
            Some(FILES_FIELD) => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .filter(|n| !n.is_empty())
                    .ok_or(UploadError::MissingFilename)?;
                let mut spool = Spool::new(spool_dir);
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    spool.write(&chunk).await?;
                }
                upload.files.push((filename, spool.finish().await?));
            }
            _ => {}
        }
    }
    Ok(upload)
}

fn multipart_error(e: MultipartError) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge
    } else {
        UploadError::Malformed(e.body_text())
    }
}
