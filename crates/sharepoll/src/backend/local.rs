//! Local-directory share backend
//!
//! Serves a directory on the local filesystem through [`RemoteClient`]. The
//! share can be stopped and started again; every stop bumps a generation
//! counter so sessions that logged in before the stop stay dead after a
//! restart, the same way a real server restart drops its sessions.

use crate::client::{ClientError, ClientFactory, ClientResult, FileAttributes, FileKind, RemoteClient, WriteMode};
use crate::config::LogLevel;
use crate::paths;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Credentials {
    domain: Option<String>,
    username: String,
    password: String,
}

struct ShareState {
    root: PathBuf,
    running: AtomicBool,
    generation: AtomicU64,
    credentials: Option<Credentials>,
}

/// A directory served as a share. Clones share the same server state.
#[derive(Clone)]
pub struct LocalShare {
    state: Arc<ShareState>,
}

impl LocalShare {
    /// Serve `root` without authentication.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        Self::build(root.into(), None)
    }

    /// Serve `root`, accepting only the given credentials.
    pub fn open_with_credentials(
        root: impl Into<PathBuf>,
        domain: Option<&str>,
        username: &str,
        password: &str,
    ) -> io::Result<Self> {
        Self::build(
            root.into(),
            Some(Credentials {
                domain: domain.map(str::to_string),
                username: username.to_string(),
                password: password.to_string(),
            }),
        )
    }

    fn build(root: PathBuf, credentials: Option<Credentials>) -> io::Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            state: Arc::new(ShareState {
                root,
                running: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                credentials,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.state.root
    }

    /// Stop serving. Every existing session is dropped.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        info!(root = %self.state.root.display(), "Local share stopped");
    }

    pub fn start(&self) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(root = %self.state.root.display(), "Local share started");
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn client(&self, log_level: LogLevel) -> LocalShareClient {
        LocalShareClient {
            share: self.clone(),
            session_generation: None,
            log_level,
        }
    }

    fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::SeqCst)
    }

    fn authenticate(
        &self,
        domain: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> ClientResult<()> {
        let Some(expected) = &self.state.credentials else {
            return Ok(());
        };
        let domain_ok = match &expected.domain {
            Some(d) => domain.map_or(false, |given| given.eq_ignore_ascii_case(d)),
            None => true,
        };
        if domain_ok
            && username == Some(expected.username.as_str())
            && password == Some(expected.password.as_str())
        {
            Ok(())
        } else {
            Err(ClientError::AuthenticationFailed(format!(
                "invalid credentials for user '{}'",
                username.unwrap_or("")
            )))
        }
    }
}

impl fmt::Debug for LocalShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalShare")
            .field("root", &self.state.root)
            .field("running", &self.is_running())
            .finish()
    }
}

/// One session against a [`LocalShare`].
pub struct LocalShareClient {
    share: LocalShare,
    session_generation: Option<u64>,
    log_level: LogLevel,
}

impl LocalShareClient {
    fn ensure_connected(&self) -> ClientResult<()> {
        if !self.share.is_running() {
            return Err(ClientError::Unavailable(format!(
                "share at {} is stopped",
                self.share.root().display()
            )));
        }
        match self.session_generation {
            Some(generation) if generation == self.share.generation() => Ok(()),
            _ => Err(ClientError::Disconnected),
        }
    }

    fn local_path(&self, path: &str) -> ClientResult<PathBuf> {
        if path.split('/').any(|segment| segment == "..") {
            return Err(ClientError::InvalidArgument(format!("'{path}' is not share-absolute")));
        }
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            Ok(self.share.root().to_path_buf())
        } else {
            Ok(self.share.root().join(trimmed))
        }
    }

    fn run<T>(
        &self,
        op: &'static str,
        path: &str,
        f: impl FnOnce(PathBuf) -> ClientResult<T>,
    ) -> ClientResult<T> {
        self.ensure_connected()?;
        if self.log_level.allows(LogLevel::Debug) {
            debug!(op, path, "share primitive");
        }
        let result = self.local_path(path).and_then(f);
        if let Err(e) = &result {
            if self.log_level.allows(LogLevel::Warn) && !matches!(e, ClientError::NotFound(_)) {
                warn!(op, path, error = %e, "share primitive failed");
            }
        }
        result
    }
}

impl RemoteClient for LocalShareClient {
    fn login(
        &mut self,
        domain: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> ClientResult<()> {
        if !self.share.is_running() {
            return Err(ClientError::Unavailable(format!(
                "share at {} is stopped",
                self.share.root().display()
            )));
        }
        self.share.authenticate(domain, username, password)?;
        self.session_generation = Some(self.share.generation());
        if self.log_level.allows(LogLevel::Info) {
            info!(user = username.unwrap_or(""), "logged in to local share");
        }
        Ok(())
    }

    fn list(&mut self, path: &str) -> ClientResult<Vec<FileAttributes>> {
        self.run("list", path, |local| {
            let meta = fs::metadata(&local).map_err(|e| map_io(e, path))?;
            if !meta.is_dir() {
                return Err(ClientError::NotADirectory(path.to_string()));
            }
            let mut entries = Vec::new();
            for entry in fs::read_dir(&local)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let meta = entry.path().symlink_metadata()?;
                entries.push(attributes_for(paths::join(path, &name), &meta));
            }
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        })
    }

    fn stat(&mut self, path: &str) -> ClientResult<Option<FileAttributes>> {
        self.run("stat", path, |local| match local.symlink_metadata() {
            Ok(meta) => Ok(Some(attributes_for(path.trim_matches('/').to_string(), &meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClientError::Io(e)),
        })
    }

    fn read(&mut self, path: &str) -> ClientResult<Vec<u8>> {
        self.run("read", path, |local| {
            let meta = fs::metadata(&local).map_err(|e| map_io(e, path))?;
            if meta.is_dir() {
                return Err(ClientError::IsADirectory(path.to_string()));
            }
            fs::read(&local).map_err(|e| map_io(e, path))
        })
    }

    fn write(&mut self, path: &str, content: &[u8], mode: WriteMode) -> ClientResult<()> {
        self.run("write", path, |local| {
            ensure_parent_dir(&local, path)?;
            if local.is_dir() {
                return Err(ClientError::IsADirectory(path.to_string()));
            }
            let mut options = OpenOptions::new();
            match mode {
                WriteMode::Overwrite => options.write(true).create(true).truncate(true),
                WriteMode::Append => options.append(true).create(true),
                WriteMode::CreateNew => options.write(true).create_new(true),
            };
            let mut file = options.open(&local).map_err(|e| map_io(e, path))?;
            file.write_all(content)?;
            file.flush()?;
            Ok(())
        })
    }

    fn mkdir(&mut self, path: &str) -> ClientResult<()> {
        self.run("mkdir", path, |local| {
            ensure_parent_dir(&local, path)?;
            fs::create_dir(&local).map_err(|e| map_io(e, path))
        })
    }

    fn copy(&mut self, source: &str, target: &str) -> ClientResult<()> {
        let target_local = self.local_path(target)?;
        self.run("copy", source, |local| {
            let meta = fs::metadata(&local).map_err(|e| map_io(e, source))?;
            if meta.is_dir() {
                return Err(ClientError::IsADirectory(source.to_string()));
            }
            if target_local.symlink_metadata().is_ok() {
                return Err(ClientError::AlreadyExists(target.to_string()));
            }
            ensure_parent_dir(&target_local, target)?;
            fs::copy(&local, &target_local).map_err(|e| map_io(e, source))?;
            Ok(())
        })
    }

    fn delete(&mut self, path: &str) -> ClientResult<()> {
        self.run("delete", path, |local| {
            if path.trim_matches('/').is_empty() {
                return Err(ClientError::InvalidArgument("cannot delete the share itself".to_string()));
            }
            let meta = local.symlink_metadata().map_err(|e| map_io(e, path))?;
            if meta.is_dir() {
                fs::remove_dir_all(&local).map_err(|e| map_io(e, path))
            } else {
                fs::remove_file(&local).map_err(|e| map_io(e, path))
            }
        })
    }

    fn rename(&mut self, path: &str, new_name: &str) -> ClientResult<()> {
        self.run("rename", path, |local| {
            if new_name.is_empty() || new_name.contains(['/', '\\']) {
                return Err(ClientError::InvalidArgument(format!("invalid name '{new_name}'")));
            }
            local.symlink_metadata().map_err(|e| map_io(e, path))?;
            let target = match local.parent() {
                Some(parent) => parent.join(new_name),
                None => return Err(ClientError::InvalidArgument(format!("cannot rename '{path}'"))),
            };
            if target.symlink_metadata().is_ok() {
                return Err(ClientError::AlreadyExists(new_name.to_string()));
            }
            fs::rename(&local, &target).map_err(|e| map_io(e, path))
        })
    }

    fn is_alive(&mut self) -> bool {
        self.ensure_connected().is_ok()
    }

    fn disconnect(&mut self) {
        self.session_generation = None;
    }
}

fn ensure_parent_dir(local: &Path, path: &str) -> ClientResult<()> {
    match local.parent() {
        Some(parent) if parent.is_dir() => Ok(()),
        _ => Err(ClientError::NotFound(
            paths::parent(path).unwrap_or_default().to_string(),
        )),
    }
}

fn attributes_for(path: String, meta: &fs::Metadata) -> FileAttributes {
    let file_type = meta.file_type();
    let kind = if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Directory
    } else {
        FileKind::Regular
    };
    FileAttributes {
        name: paths::file_name(&path).to_string(),
        size: (kind != FileKind::Directory).then(|| meta.len()),
        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        kind,
        path,
    }
}

fn map_io(err: io::Error, path: &str) -> ClientError {
    match err.kind() {
        io::ErrorKind::NotFound => ClientError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => ClientError::AlreadyExists(path.to_string()),
        _ => ClientError::Io(err),
    }
}

/// Maps host names to local shares.
#[derive(Clone, Default)]
pub struct LocalShareFactory {
    shares: HashMap<String, LocalShare>,
}

impl LocalShareFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_share(mut self, host: impl Into<String>, share: LocalShare) -> Self {
        self.shares.insert(host.into().to_ascii_lowercase(), share);
        self
    }
}

impl ClientFactory for LocalShareFactory {
    fn create(&self, host: &str, log_level: LogLevel) -> ClientResult<Box<dyn RemoteClient>> {
        match self.shares.get(&host.to_ascii_lowercase()) {
            Some(share) => Ok(Box::new(share.client(log_level))),
            None => Err(ClientError::Unavailable(format!("unknown host '{host}'"))),
        }
    }
}
