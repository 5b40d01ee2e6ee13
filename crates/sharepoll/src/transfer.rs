//! Copy and move between share directories.

use crate::client::ClientError;
use crate::connection::FileSystemConnection;
use crate::error::{ConnectorError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    Copy,
    Move,
}

impl CopyMode {
    pub fn label(self) -> &'static str {
        match self {
            CopyMode::Copy => "copy",
            CopyMode::Move => "move",
        }
    }
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Replace an existing target instead of failing
    pub overwrite: bool,
    /// Create the target directory (and its parents) when missing
    pub create_parent_directories: bool,
    /// Name of the new entry; the source name when unset
    pub rename_to: Option<String>,
}

impl CopyOptions {
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_create_parent_directories(mut self, create: bool) -> Self {
        self.create_parent_directories = create;
        self
    }

    pub fn with_rename_to(mut self, name: impl Into<String>) -> Self {
        self.rename_to = Some(name.into());
        self
    }
}

/// Share-absolute paths taking part in one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferEndpoints {
    pub source: String,
    pub target_dir: String,
    pub target: String,
}

impl TransferEndpoints {
    pub(crate) fn resolve(
        conn: &FileSystemConnection,
        source: &str,
        target_dir: &str,
        options: &CopyOptions,
    ) -> Result<Self> {
        let source = conn.resolve(source)?;
        let target_dir = conn.resolve(target_dir)?;
        let name = match &options.rename_to {
            Some(name) => name.clone(),
            None => paths::file_name(&source).to_string(),
        };
        paths::validate_name(&name)?;
        let target = paths::join(&target_dir, &name);
        Ok(Self {
            source,
            target_dir,
            target,
        })
    }
}

/// Runs a copy or move. The caller holds the locks for the source and the
/// target.
///
/// An existing target is replaced only once a full copy sits next to it, so
/// a failed transfer leaves both the source and the old target in place.
pub(crate) fn execute(
    conn: &mut FileSystemConnection,
    endpoints: &TransferEndpoints,
    mode: CopyMode,
    options: &CopyOptions,
) -> Result<String> {
    let op = mode.label();
    let source = endpoints.source.as_str();
    let target_dir = endpoints.target_dir.as_str();
    let target = endpoints.target.as_str();
    let invalid = |conn: &FileSystemConnection, path: &str, reason: &str| {
        ConnectorError::operation(
            op,
            conn.relativize(path),
            ClientError::InvalidArgument(reason.to_string()),
        )
    };

    let Some(src) = conn.raw_stat(op, source)? else {
        return Err(ConnectorError::operation(
            op,
            conn.relativize(source),
            ClientError::NotFound(conn.relativize(source)),
        ));
    };

    match conn.raw_stat(op, target_dir)? {
        None if options.create_parent_directories => conn.raw_mkdir_all(op, target_dir)?,
        None => {
            return Err(ConnectorError::operation(
                op,
                conn.relativize(target_dir),
                ClientError::NotFound(conn.relativize(target_dir)),
            ))
        }
        Some(attrs) if !attrs.is_directory() => {
            return Err(ConnectorError::operation(
                op,
                conn.relativize(target_dir),
                ClientError::NotADirectory(conn.relativize(target_dir)),
            ))
        }
        Some(_) => {}
    }

    if target == source {
        return Err(invalid(&*conn, source, "source and target are the same"));
    }
    if src.is_directory() && paths::is_within(target, source) {
        return Err(invalid(&*conn, source, "cannot copy a directory into itself"));
    }
    if paths::is_within(source, target) {
        return Err(invalid(&*conn, target, "target contains the source"));
    }

    let replacing = conn.raw_stat(op, target)?.is_some();
    if replacing && !options.overwrite {
        return Err(ConnectorError::operation(
            op,
            conn.relativize(target),
            ClientError::AlreadyExists(conn.relativize(target)),
        ));
    }

    if replacing {
        let staging = staging_path(target_dir, target);
        if let Err(e) = copy_entry(conn, op, source, &staging, src.is_directory()) {
            discard_partial(conn, op, &staging);
            return Err(e);
        }
        debug!(dest = %target, "Replacing existing target");
        if let Err(e) = conn.raw_delete(op, target) {
            discard_partial(conn, op, &staging);
            return Err(e);
        }
        conn.raw_rename(op, &staging, paths::file_name(target))?;
    } else if let Err(e) = copy_entry(conn, op, source, target, src.is_directory()) {
        discard_partial(conn, op, target);
        return Err(e);
    }

    if mode == CopyMode::Move {
        conn.raw_delete(op, source)?;
    }

    let relative = conn.relativize(target);
    info!(
        mode = op,
        source = %conn.relativize(source),
        dest = %relative,
        "Transfer complete"
    );
    Ok(relative)
}

/// Hidden sibling of `target` that receives the copy before it replaces
/// the existing entry.
fn staging_path(target_dir: &str, target: &str) -> String {
    let name = format!(
        ".{}.partial-{}",
        paths::file_name(target),
        Uuid::new_v4().simple()
    );
    paths::join(target_dir, &name)
}

fn copy_entry(
    conn: &mut FileSystemConnection,
    op: &'static str,
    source: &str,
    target: &str,
    is_directory: bool,
) -> Result<()> {
    if !is_directory {
        return conn.raw_copy(op, source, target);
    }
    conn.raw_mkdir(op, target)?;
    for child in conn.raw_list(op, source)? {
        if child.is_symlink() {
            warn!(path = %conn.relativize(&child.path), "Skipping symbolic link");
            continue;
        }
        let child_target = paths::join(target, &child.name);
        copy_entry(conn, op, &child.path, &child_target, child.is_directory())?;
    }
    Ok(())
}

fn discard_partial(conn: &mut FileSystemConnection, op: &'static str, target: &str) {
    match conn.raw_stat(op, target) {
        Ok(Some(_)) => {
            if let Err(e) = conn.raw_delete(op, target) {
                warn!(dest = %target, error = %e, "Could not remove partial copy");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(dest = %target, error = %e, "Could not inspect partial copy"),
    }
}
