//! Share path resolution.
//!
//! Paths handed to a [`crate::RemoteClient`] are share-absolute: `/`-separated,
//! no leading slash, `""` for the top of the share. User-facing paths are
//! relative to the configured share root unless they start with `/`, in which
//! case they are already share-absolute.

use crate::error::{ConnectorError, Result};

/// Collapse `.`/`..` segments and duplicate separators.
///
/// Fails when `..` would climb above the top of the share.
pub fn normalize(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ConnectorError::InvalidPath {
                        path: path.to_string(),
                        reason: "escapes the top of the share".to_string(),
                    });
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// Resolve a user-facing path against the share root.
pub fn resolve(share_root: Option<&str>, path: &str) -> Result<String> {
    if path.starts_with('/') || path.starts_with('\\') {
        return normalize(path);
    }
    match share_root {
        Some(root) if !root.trim().is_empty() => normalize(&format!("{root}/{path}")),
        _ => normalize(path),
    }
}

/// Inverse of [`resolve`] for paths reported by the client.
///
/// Paths outside the share root come back share-absolute (leading `/`).
pub fn relativize(share_root: Option<&str>, share_path: &str) -> String {
    let root = share_root
        .and_then(|root| normalize(root).ok())
        .unwrap_or_default();
    if root.is_empty() {
        return share_path.to_string();
    }
    if share_path == root {
        return String::new();
    }
    match share_path.strip_prefix(&root).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => format!("/{share_path}"),
    }
}

pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(""))
}

/// True when `path` equals `ancestor` or lives below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || path
            .strip_prefix(ancestor)
            .map_or(false, |rest| rest.starts_with('/'))
}

/// A single path segment usable as a new entry name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConnectorError::InvalidPath {
            path: name.to_string(),
            reason: "not a valid entry name".to_string(),
        });
    }
    Ok(())
}
