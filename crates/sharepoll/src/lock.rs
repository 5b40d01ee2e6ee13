//! Per-path locking.
//!
//! Locks are keyed by share-absolute path. Operations on the same path
//! serialize; different paths never block each other. Callers needing more
//! than one path go through [`lock_all`], which acquires in sorted order.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::trace;

/// Host capability handing out exclusive path locks.
pub trait LockProvider: Send + Sync {
    /// Blocks until `path` is free.
    fn lock(&self, path: &str) -> PathLockGuard;

    fn try_lock(&self, path: &str) -> Option<PathLockGuard>;
}

/// Exclusive hold on one path. Released on drop.
pub struct PathLockGuard {
    path: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PathLockGuard {
    pub fn new(path: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path: path.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for PathLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLockGuard").field("path", &self.path).finish()
    }
}

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn release(&self, path: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(path);
        trace!(path, "path lock released");
        self.released.notify_all();
    }
}

/// In-process [`LockProvider`].
#[derive(Clone, Default)]
pub struct PathLocks {
    table: Arc<LockTable>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self, path: &str) -> PathLockGuard {
        let table = Arc::clone(&self.table);
        let key = path.to_string();
        PathLockGuard::new(path, move || table.release(&key))
    }

    /// Number of paths currently locked.
    pub fn held(&self) -> usize {
        self.table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LockProvider for PathLocks {
    fn lock(&self, path: &str) -> PathLockGuard {
        let mut held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(path) {
            held = self
                .table
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(path.to_string());
        drop(held);
        trace!(path, "path lock acquired");
        self.guard(path)
    }

    fn try_lock(&self, path: &str) -> Option<PathLockGuard> {
        let mut held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(path.to_string()) {
            return None;
        }
        drop(held);
        Some(self.guard(path))
    }
}

impl fmt::Debug for PathLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLocks").field("held", &self.held()).finish()
    }
}

/// Lock several paths in sorted order, skipping duplicates.
pub fn lock_all(provider: &dyn LockProvider, paths: &[&str]) -> Vec<PathLockGuard> {
    let mut sorted: Vec<&str> = paths.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.into_iter().map(|p| provider.lock(p)).collect()
}
