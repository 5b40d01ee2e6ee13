//! File operations over one pooled session
//!
//! Every user-facing path is resolved against the share root (see
//! [`crate::paths`]) and locked before the client sees it. Results carry
//! share-root-relative paths.

use crate::client::{ClientError, FileAttributes, WriteMode};
use crate::error::{ConnectorError, Result};
use crate::lock::{lock_all, LockProvider, PathLockGuard};
use crate::paths;
use crate::pool::PooledSession;
use crate::session::ValidationResult;
use crate::transfer::{self, CopyMode, CopyOptions, TransferEndpoints};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct FileSystemConnection {
    session: PooledSession,
    locks: Arc<dyn LockProvider>,
}

impl FileSystemConnection {
    pub fn new(session: PooledSession, locks: Arc<dyn LockProvider>) -> Self {
        Self { session, locks }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn share_root(&self) -> Option<&str> {
        self.session.share_root()
    }

    /// Share-absolute form of a user-facing path.
    pub fn resolve(&self, path: &str) -> Result<String> {
        paths::resolve(self.share_root(), path)
    }

    pub fn relativize(&self, share_path: &str) -> String {
        paths::relativize(self.share_root(), share_path)
    }

    pub fn validate(&mut self) -> ValidationResult {
        self.session.check_alive()
    }

    /// Lock a user-facing path for the lifetime of the guard.
    pub fn lock(&self, path: &str) -> Result<PathLockGuard> {
        let resolved = self.resolve(path)?;
        Ok(self.locks.lock(&resolved))
    }

    /// Entries below `dir`, depth-first per directory level when `recursive`.
    pub fn list(&mut self, dir: &str, recursive: bool) -> Result<Vec<FileAttributes>> {
        let root = self.resolve(dir)?;
        let _guard = self.locks.lock(&root);

        let mut pending = VecDeque::from([root]);
        let mut listed = Vec::new();
        while let Some(current) = pending.pop_front() {
            for mut entry in self.raw_list("list", &current)? {
                if recursive && entry.is_directory() {
                    pending.push_back(entry.path.clone());
                }
                entry.path = self.relativize(&entry.path);
                listed.push(entry);
            }
        }
        Ok(listed)
    }

    pub fn stat(&mut self, path: &str) -> Result<Option<FileAttributes>> {
        let resolved = self.resolve(path)?;
        let _guard = self.locks.lock(&resolved);
        let stat = self.raw_stat("stat", &resolved)?;
        Ok(stat.map(|mut attrs| {
            attrs.path = self.relativize(&attrs.path);
            attrs
        }))
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    pub fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        let _guard = self.locks.lock(&resolved);
        self.read_unlocked(&resolved)
    }

    /// Read a share-absolute path the caller already holds the lock for.
    pub(crate) fn read_unlocked(&mut self, share_path: &str) -> Result<Vec<u8>> {
        let result = self.session.client().read(share_path);
        result.map_err(|e| self.op_error("read", share_path, e))
    }

    pub fn write(
        &mut self,
        path: &str,
        content: &[u8],
        mode: WriteMode,
        create_parent_directories: bool,
    ) -> Result<()> {
        let resolved = self.resolve(path)?;
        let _guard = self.locks.lock(&resolved);
        if create_parent_directories {
            if let Some(parent) = paths::parent(&resolved) {
                self.raw_mkdir_all("write", parent)?;
            }
        }
        let result = self.session.client().write(&resolved, content, mode);
        result.map_err(|e| self.op_error("write", &resolved, e))?;
        debug!(path = %resolved, bytes = content.len(), ?mode, "File written");
        Ok(())
    }

    /// Create a directory and any missing parents. Fails if it already exists.
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let _guard = self.locks.lock(&resolved);
        if self.raw_stat("create_directory", &resolved)?.is_some() {
            return Err(self.op_error(
                "create_directory",
                &resolved,
                ClientError::AlreadyExists(resolved.clone()),
            ));
        }
        self.raw_mkdir_all("create_directory", &resolved)
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        let _guard = self.locks.lock(&resolved);
        self.raw_delete("delete", &resolved)?;
        debug!(path = %resolved, "Deleted");
        Ok(())
    }

    /// Rename in place. An existing entry named `new_name` is replaced only
    /// when `overwrite` is set.
    pub fn rename(&mut self, path: &str, new_name: &str, overwrite: bool) -> Result<()> {
        paths::validate_name(new_name)?;
        let resolved = self.resolve(path)?;
        let parent = paths::parent(&resolved).ok_or_else(|| ConnectorError::InvalidPath {
            path: path.to_string(),
            reason: "the top of the share cannot be renamed".to_string(),
        })?;
        let target = paths::join(parent, new_name);
        if target == resolved {
            return Ok(());
        }
        let _guards = self.lock_resolved(&[&resolved, &target]);

        if self.raw_stat("rename", &resolved)?.is_none() {
            return Err(self.op_error("rename", &resolved, ClientError::NotFound(resolved.clone())));
        }
        if self.raw_stat("rename", &target)?.is_some() {
            if !overwrite {
                return Err(self.op_error("rename", &target, ClientError::AlreadyExists(target.clone())));
            }
            self.raw_delete("rename", &target)?;
        }
        self.raw_rename("rename", &resolved, new_name)?;
        debug!(from = %resolved, to = %target, "Renamed");
        Ok(())
    }

    /// Copy or move `source` into `target_dir`. Returns the new entry's path.
    pub fn copy_or_move(
        &mut self,
        source: &str,
        target_dir: &str,
        mode: CopyMode,
        options: &CopyOptions,
    ) -> Result<String> {
        let endpoints = TransferEndpoints::resolve(self, source, target_dir, options)?;
        let _guards = self.lock_resolved(&[&endpoints.source, &endpoints.target]);
        transfer::execute(self, &endpoints, mode, options)
    }

    /// Lock share-absolute paths in sorted order.
    pub(crate) fn lock_resolved(&self, share_paths: &[&str]) -> Vec<PathLockGuard> {
        lock_all(self.locks.as_ref(), share_paths)
    }

    /// Return the session to the pool; a session that went bad is rejected.
    pub fn close(self) -> Result<()> {
        self.session.release()
    }

    fn op_error(&self, op: &'static str, share_path: &str, source: ClientError) -> ConnectorError {
        ConnectorError::operation(op, self.relativize(share_path), source)
    }

    pub(crate) fn raw_stat(&mut self, op: &'static str, share_path: &str) -> Result<Option<FileAttributes>> {
        let result = self.session.client().stat(share_path);
        result.map_err(|e| self.op_error(op, share_path, e))
    }

    pub(crate) fn raw_list(&mut self, op: &'static str, share_path: &str) -> Result<Vec<FileAttributes>> {
        let result = self.session.client().list(share_path);
        result.map_err(|e| self.op_error(op, share_path, e))
    }

    pub(crate) fn raw_copy(&mut self, op: &'static str, source: &str, target: &str) -> Result<()> {
        let result = self.session.client().copy(source, target);
        result.map_err(|e| self.op_error(op, source, e))
    }

    pub(crate) fn raw_delete(&mut self, op: &'static str, share_path: &str) -> Result<()> {
        let result = self.session.client().delete(share_path);
        result.map_err(|e| self.op_error(op, share_path, e))
    }

    /// Rename within the parent directory; `new_name` must not exist.
    pub(crate) fn raw_rename(&mut self, op: &'static str, share_path: &str, new_name: &str) -> Result<()> {
        let result = self.session.client().rename(share_path, new_name);
        result.map_err(|e| self.op_error(op, share_path, e))
    }

    pub(crate) fn raw_mkdir(&mut self, op: &'static str, share_path: &str) -> Result<()> {
        let result = self.session.client().mkdir(share_path);
        result.map_err(|e| self.op_error(op, share_path, e))
    }

    /// `mkdir -p` on a share-absolute path.
    pub(crate) fn raw_mkdir_all(&mut self, op: &'static str, share_path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in share_path.split('/').filter(|s| !s.is_empty()) {
            current = paths::join(&current, segment);
            match self.raw_stat(op, &current)? {
                Some(attrs) if attrs.is_directory() => {}
                Some(_) => {
                    return Err(self.op_error(op, &current, ClientError::NotADirectory(current.clone())))
                }
                None => match self.raw_mkdir(op, &current) {
                    Ok(()) => {}
                    Err(ConnectorError::Operation {
                        source: ClientError::AlreadyExists(_),
                        ..
                    }) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FileSystemConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemConnection")
            .field("session", &self.session_id())
            .field("share_root", &self.share_root())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalShare, LocalShareFactory};
    use crate::config::{ConnectionConfig, PoolConfig};
    use crate::lock::PathLocks;
    use crate::pool::SessionPool;
    use crate::session::SessionManager;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        pool: SessionPool,
        locks: Arc<PathLocks>,
    }

    impl Fixture {
        fn new(share_root: Option<&str>) -> Self {
            let temp = TempDir::new().unwrap();
            let share = LocalShare::open(temp.path()).unwrap();
            let factory = LocalShareFactory::new().with_share("fileserver", share);
            let mut config = ConnectionConfig::new("fileserver");
            if let Some(root) = share_root {
                fs::create_dir_all(temp.path().join(root)).unwrap();
                config = config.with_share_root(root);
            }
            let manager = SessionManager::new(config, Arc::new(factory)).unwrap();
            let pool = SessionPool::new(Arc::new(manager), PoolConfig::default()).unwrap();
            Self {
                temp,
                pool,
                locks: Arc::new(PathLocks::new()),
            }
        }

        fn connection(&self) -> FileSystemConnection {
            FileSystemConnection::new(self.pool.checkout().unwrap(), self.locks.clone())
        }
    }

    #[test]
    fn test_paths_resolve_against_share_root() {
        let fx = Fixture::new(Some("data"));
        let mut conn = fx.connection();

        conn.write("in/a.txt", b"hello", WriteMode::Overwrite, true).unwrap();
        assert_eq!(fs::read(fx.temp.path().join("data/in/a.txt")).unwrap(), b"hello");

        conn.write("/elsewhere.txt", b"abs", WriteMode::Overwrite, false).unwrap();
        assert!(fx.temp.path().join("elsewhere.txt").exists());

        let listed = conn.list("", true).unwrap();
        let listed: Vec<_> = listed.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(listed, vec!["in", "in/a.txt"]);

        assert_eq!(conn.stat("/elsewhere.txt").unwrap().unwrap().path, "/elsewhere.txt");
        assert!(conn.read("../../etc/passwd").is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_list_non_recursive() {
        let fx = Fixture::new(None);
        fs::create_dir_all(fx.temp.path().join("dir/sub")).unwrap();
        fs::write(fx.temp.path().join("dir/top.txt"), b"x").unwrap();
        fs::write(fx.temp.path().join("dir/sub/deep.txt"), b"y").unwrap();

        let mut conn = fx.connection();
        let flat: Vec<_> = conn.list("dir", false).unwrap().into_iter().map(|a| a.path).collect();
        assert_eq!(flat, vec!["dir/sub", "dir/top.txt"]);
        let deep: Vec<_> = conn.list("dir", true).unwrap().into_iter().map(|a| a.path).collect();
        assert_eq!(deep, vec!["dir/sub", "dir/top.txt", "dir/sub/deep.txt"]);

        assert!(matches!(
            conn.list("missing", false),
            Err(ConnectorError::Operation { source: ClientError::NotFound(_), .. })
        ));
    }

    #[test]
    fn test_write_modes_and_directories() {
        let fx = Fixture::new(None);
        let mut conn = fx.connection();

        conn.create_directory("a/b/c").unwrap();
        assert!(conn.create_directory("a/b/c").is_err());
        assert!(conn.exists("a/b").unwrap());

        conn.write("a/log.txt", b"one", WriteMode::CreateNew, false).unwrap();
        conn.write("a/log.txt", b"two", WriteMode::Append, false).unwrap();
        assert_eq!(conn.read("a/log.txt").unwrap(), b"onetwo");
        assert!(conn.write("a/log.txt", b"x", WriteMode::CreateNew, false).is_err());
        assert!(conn.write("nope/x.txt", b"x", WriteMode::Overwrite, false).is_err());

        conn.delete("a").unwrap();
        assert!(!conn.exists("a").unwrap());
    }

    #[test]
    fn test_rename_overwrite() {
        let fx = Fixture::new(None);
        let mut conn = fx.connection();
        conn.write("a.txt", b"a", WriteMode::Overwrite, false).unwrap();
        conn.write("b.txt", b"b", WriteMode::Overwrite, false).unwrap();

        assert!(matches!(
            conn.rename("a.txt", "b.txt", false),
            Err(ConnectorError::Operation { source: ClientError::AlreadyExists(_), .. })
        ));
        conn.rename("a.txt", "b.txt", true).unwrap();
        assert_eq!(conn.read("b.txt").unwrap(), b"a");
        assert!(!conn.exists("a.txt").unwrap());
        assert!(conn.rename("b.txt", "sub/c.txt", false).is_err());
    }

    #[test]
    fn test_lock_holds_resolved_path() {
        let fx = Fixture::new(Some("data"));
        let conn = fx.connection();

        let guard = conn.lock("in/a.txt").unwrap();
        assert_eq!(guard.path(), "data/in/a.txt");
        assert!(fx.locks.try_lock("data/in/a.txt").is_none());
        assert!(fx.locks.try_lock("data/in/b.txt").is_some());

        drop(guard);
        assert_eq!(fx.locks.held(), 0);
    }

    #[test]
    fn test_operations_fail_after_outage() {
        let temp = TempDir::new().unwrap();
        let share = LocalShare::open(temp.path()).unwrap();
        let factory = LocalShareFactory::new().with_share("fileserver", share.clone());
        let manager = SessionManager::new(ConnectionConfig::new("fileserver"), Arc::new(factory)).unwrap();
        let pool = SessionPool::new(Arc::new(manager), PoolConfig::default()).unwrap();

        let mut conn = FileSystemConnection::new(pool.checkout().unwrap(), Arc::new(PathLocks::new()));
        share.stop();
        let err = conn.list("", false).unwrap_err();
        assert!(err.is_session_broken());
        assert_eq!(
            conn.validate(),
            ValidationResult::Invalid("connection to 'fileserver' is no longer alive".to_string())
        );
        assert!(conn.close().is_err());
    }
}
