//! Remote session client seam.
//!
//! The wire protocol lives behind [`RemoteClient`]. Every path handed to a
//! client is share-absolute (see [`crate::paths`]); share-root resolution
//! happens before a call reaches this layer.

use crate::config::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Type of a remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

/// Metadata for one remote entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Share-root-relative path (share-absolute with a leading `/` when outside the root)
    pub path: String,
    pub name: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub kind: FileKind,
}

impl FileAttributes {
    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// How `write` treats an existing file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
    CreateNew,
}

/// Failure reported by a client primitive.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Session is disconnected")]
    Disconnected,

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Transport-level loss; the session must not be reused.
    pub fn is_session_broken(&self) -> bool {
        matches!(self, ClientError::Disconnected | ClientError::Unavailable(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Primitives of one authenticated handle to a remote share.
pub trait RemoteClient: Send {
    fn login(
        &mut self,
        domain: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> ClientResult<()>;

    /// Direct children of `path`, with share-absolute paths.
    fn list(&mut self, path: &str) -> ClientResult<Vec<FileAttributes>>;

    /// `Ok(None)` when nothing exists at `path`.
    fn stat(&mut self, path: &str) -> ClientResult<Option<FileAttributes>>;

    fn read(&mut self, path: &str) -> ClientResult<Vec<u8>>;

    /// The parent directory must exist.
    fn write(&mut self, path: &str, content: &[u8], mode: WriteMode) -> ClientResult<()>;

    /// Creates a single directory level.
    fn mkdir(&mut self, path: &str) -> ClientResult<()>;

    /// Copies one regular file to `target`, which must not exist.
    fn copy(&mut self, source: &str, target: &str) -> ClientResult<()>;

    /// Deletes a file, or a directory with everything below it.
    fn delete(&mut self, path: &str) -> ClientResult<()>;

    /// Renames within the same directory; fails if `new_name` exists.
    fn rename(&mut self, path: &str, new_name: &str) -> ClientResult<()>;

    fn is_alive(&mut self) -> bool;

    fn disconnect(&mut self);
}

/// Creates unauthenticated clients for a host.
pub trait ClientFactory: Send + Sync {
    fn create(&self, host: &str, log_level: LogLevel) -> ClientResult<Box<dyn RemoteClient>>;
}
