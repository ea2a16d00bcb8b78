//! Lexical path handling for directory transfers
//!
//! Nothing here touches the filesystem. Paths are normalised by components
//! so containment checks cannot be fooled by `..` segments in object keys.

use crate::error::{Result, TransferError};
use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without consulting the filesystem
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, lexically cleaned form of `path`
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let abs = std::path::absolute(path).map_err(|e| TransferError::Filesystem {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(clean(&abs))
}

/// Map an object key to a file under `destination`
///
/// The key prefix (with a trailing `/` implied) is stripped first and the
/// remaining `/`-separated segments become path components. Fails if the
/// result would be the destination itself or anywhere outside it.
pub fn resolve_download_path(
    destination: &Path,
    key_prefix: Option<&str>,
    key: &str,
) -> Result<PathBuf> {
    let relative = match key_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) if prefix.ends_with('/') => key.strip_prefix(prefix),
        Some(prefix) => key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/')),
        None => Some(key),
    }
    .unwrap_or(key);

    let escape = || TransferError::PathEscapesDestination {
        path: destination.join(relative.replace('/', std::path::MAIN_SEPARATOR_STR)),
        destination: destination.to_path_buf(),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or_else(escape)?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(escape());
    }

    let mut path = destination.to_path_buf();
    for segment in segments {
        // a segment may still carry a platform separator or drive prefix
        let mut parts = Path::new(segment).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => return Err(escape()),
        }
    }
    Ok(path)
}

/// Build the object key for a file found while walking a directory
pub fn upload_key(key_prefix: Option<&str>, segments: &[String], delimiter: &str) -> String {
    let joined = segments.join(delimiter);
    match key_prefix
        .map(|p| p.trim_end_matches(delimiter))
        .filter(|p| !p.is_empty())
    {
        Some(prefix) => format!("{}{}{}", prefix, delimiter, joined),
        None => joined,
    }
}

/// Reject names that would be split by a custom key delimiter
pub fn check_delimiter(name: &str, delimiter: &str) -> Result<()> {
    if delimiter != "/" && name.contains(delimiter) {
        return Err(TransferError::DelimiterInName {
            name: name.to_string(),
            delimiter: delimiter.to_string(),
        });
    }
    Ok(())
}
