//! Mapping logical (URL) paths onto the serve root.
//!
//! All checks are lexical: `.` and `..` are folded before comparing against
//! the root. Symlinks inside the serve root are followed by the filesystem.

use std::path::{Component, Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped when a logical path is put back into a URL.
const URL_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A resolved path fell outside the serve root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unable to use a path outside the served directory")]
pub struct PathEscape;

/// Fold `.` and `..` components without touching the filesystem.
///
/// A `..` that would climb above the first component is kept, so callers can
/// detect the escape by comparing prefixes.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Join `segments` onto `root` and require the result to stay within `root`.
///
/// Each segment is treated as relative even if it starts with `/`.
pub fn contain(root: &Path, segments: &[&str]) -> Result<PathBuf, PathEscape> {
    let root = normalize(root);
    let mut joined = root.clone();
    for segment in segments {
        joined.push(segment.trim_start_matches(['/', '\\']));
    }
    let joined = normalize(&joined);
    if joined.starts_with(&root) {
        Ok(joined)
    } else {
        Err(PathEscape)
    }
}

/// Clean a request path the way HTTP routers do: percent-decode, then
/// [`tidy_logical`].
pub fn clean_logical(raw: &str) -> String {
    tidy_logical(&percent_decode_str(raw).decode_utf8_lossy())
}

/// Fold `.` and `..` (never above `/`) and collapse repeated slashes in an
/// already decoded path. Always starts with `/`.
pub fn tidy_logical(logical: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in logical.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a logical directory path and a child name with exactly one `/`.
pub fn join_logical(parent: &str, name: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Percent-encode a logical path for use in `href` or `Location`.
pub fn encode_logical(logical: &str) -> String {
    utf8_percent_encode(logical, URL_PATH).to_string()
}

/// Physical location of an already-cleaned logical path.
pub fn resolve(root: &Path, logical: &str) -> Result<PathBuf, PathEscape> {
    contain(root, &[logical])
}
