//! Connector facade
//!
//! Owns the session manager, pool, lock provider, scheduler and the running
//! listeners of one share configuration.

use crate::client::{ClientFactory, FileAttributes, WriteMode};
use crate::config::{ConnectorConfig, ListenerConfig};
use crate::connection::FileSystemConnection;
use crate::consumer::FileConsumer;
use crate::error::{ConnectorError, Result};
use crate::listener::{DirectoryListener, ListenerHandle};
use crate::lock::{LockProvider, PathLocks};
use crate::pool::SessionPool;
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::session::{PoolingProvider, SessionManager};
use crate::transfer::{CopyMode, CopyOptions};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub struct Connector {
    config: ConnectorConfig,
    pool: SessionPool,
    locks: Arc<dyn LockProvider>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Mutex<Vec<DirectoryListener>>,
}

impl Connector {
    /// Validate `config` and build the connector with in-process locks and
    /// one thread per listener. No session is opened yet.
    pub fn new(config: ConnectorConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        config.validate()?;
        let manager = SessionManager::new(config.connection.clone(), factory)?;
        Self::with_capabilities(
            config,
            Arc::new(manager),
            Arc::new(PathLocks::new()),
            Arc::new(ThreadScheduler::new()),
        )
    }

    /// Build the connector on host-supplied capabilities.
    pub fn with_capabilities(
        config: ConnectorConfig,
        provider: Arc<dyn PoolingProvider>,
        locks: Arc<dyn LockProvider>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = SessionPool::new(provider, config.pool.clone())?;
        info!(
            host = %config.connection.host,
            share_root = config.connection.share_root.as_deref().unwrap_or(""),
            max_sessions = config.pool.max_sessions,
            "Connector ready"
        );
        Ok(Self {
            config,
            pool,
            locks,
            scheduler,
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Check out a connection. Call [`FileSystemConnection::close`] when done.
    pub fn connection(&self) -> Result<FileSystemConnection> {
        let session = self.pool.checkout()?;
        Ok(FileSystemConnection::new(session, Arc::clone(&self.locks)))
    }

    fn with_connection<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut FileSystemConnection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connection()?;
        let result = f(&mut conn);
        match conn.close() {
            Ok(()) => result,
            Err(e) => match result {
                Ok(value) => {
                    warn!(op, error = %e, "Session rejected after successful operation");
                    Ok(value)
                }
                Err(op_err) => Err(op_err),
            },
        }
    }

    pub fn list(&self, dir: &str, recursive: bool) -> Result<Vec<FileAttributes>> {
        self.with_connection("list", |conn| conn.list(dir, recursive))
    }

    pub fn stat(&self, path: &str) -> Result<Option<FileAttributes>> {
        self.with_connection("stat", |conn| conn.stat(path))
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.with_connection("read", |conn| conn.read(path))
    }

    pub fn write(
        &self,
        path: &str,
        content: &[u8],
        mode: WriteMode,
        create_parent_directories: bool,
    ) -> Result<()> {
        self.with_connection("write", |conn| {
            conn.write(path, content, mode, create_parent_directories)
        })
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.with_connection("create_directory", |conn| conn.create_directory(path))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.with_connection("delete", |conn| conn.delete(path))
    }

    pub fn rename(&self, path: &str, new_name: &str, overwrite: bool) -> Result<()> {
        self.with_connection("rename", |conn| conn.rename(path, new_name, overwrite))
    }

    pub fn copy(&self, source: &str, target_dir: &str, options: &CopyOptions) -> Result<String> {
        self.with_connection("copy", |conn| {
            conn.copy_or_move(source, target_dir, CopyMode::Copy, options)
        })
    }

    pub fn move_file(&self, source: &str, target_dir: &str, options: &CopyOptions) -> Result<String> {
        self.with_connection("move", |conn| {
            conn.copy_or_move(source, target_dir, CopyMode::Move, options)
        })
    }

    /// Start a listener. Names must be unique among running listeners.
    pub fn start_listener(
        &self,
        config: ListenerConfig,
        consumer: Arc<dyn FileConsumer>,
    ) -> Result<ListenerHandle> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| l.name() == config.name) {
            return Err(ConnectorError::config(format!(
                "listener '{}' is already running",
                config.name
            )));
        }
        let listener = DirectoryListener::start(
            config,
            self.pool.clone(),
            Arc::clone(&self.locks),
            consumer,
            self.scheduler.as_ref(),
        )?;
        let handle = listener.handle();
        listeners.push(listener);
        Ok(handle)
    }

    /// Start every listener from the configuration file, all feeding `consumer`.
    pub fn start_configured_listeners(
        &self,
        consumer: Arc<dyn FileConsumer>,
    ) -> Result<Vec<ListenerHandle>> {
        self.config
            .listeners
            .iter()
            .map(|config| self.start_listener(config.clone(), Arc::clone(&consumer)))
            .collect()
    }

    pub fn listeners(&self) -> Vec<ListenerHandle> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(DirectoryListener::handle)
            .collect()
    }

    /// Stop one listener. Returns false when no listener has that name.
    pub fn stop_listener(&self, name: &str) -> bool {
        let mut listener = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(index) = listeners.iter().position(|l| l.name() == name) else {
                return false;
            };
            listeners.remove(index)
        };
        listener.stop();
        true
    }

    /// Stop all listeners, then wait for borrowed sessions and close the pool.
    pub fn shutdown(&self) {
        let listeners: Vec<DirectoryListener> = {
            let mut guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for mut listener in listeners {
            listener.stop();
        }
        self.pool.close();
        info!(host = %self.config.connection.host, "Connector shut down");
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.config.connection.host)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalShare, LocalShareFactory};
    use crate::config::ConnectionConfig;
    use crate::consumer::ChannelConsumer;
    use tempfile::TempDir;

    fn connector(temp: &TempDir) -> Connector {
        let share = LocalShare::open(temp.path()).unwrap();
        let factory = LocalShareFactory::new().with_share("fileserver", share);
        Connector::new(ConnectorConfig::new(ConnectionConfig::new("fileserver")), Arc::new(factory))
            .unwrap()
    }

    #[test]
    fn test_operations_return_sessions() {
        let temp = TempDir::new().unwrap();
        let connector = connector(&temp);

        connector.write("a.txt", b"abc", WriteMode::Overwrite, false).unwrap();
        assert_eq!(connector.read("a.txt").unwrap(), b"abc");
        assert_eq!(connector.list("", false).unwrap().len(), 1);
        assert!(connector.read("missing.txt").is_err());

        assert_eq!(connector.pool().outstanding(), 0);
        assert_eq!(connector.pool().idle_count(), 1);
        connector.shutdown();
        assert!(matches!(connector.read("a.txt"), Err(ConnectorError::PoolClosed)));
    }

    #[test]
    fn test_listener_names_are_unique() {
        let temp = TempDir::new().unwrap();
        let connector = connector(&temp);
        let (consumer, _rx) = ChannelConsumer::bounded(4);
        let consumer: Arc<dyn FileConsumer> = Arc::new(consumer);

        connector
            .start_listener(ListenerConfig::new("inbox", ""), Arc::clone(&consumer))
            .unwrap();
        assert!(connector
            .start_listener(ListenerConfig::new("inbox", ""), consumer)
            .is_err());
        assert_eq!(connector.listeners().len(), 1);
        assert!(connector.stop_listener("inbox"));
        assert!(!connector.stop_listener("inbox"));
        connector.shutdown();
    }

    #[test]
    fn test_invalid_config_fails_eagerly() {
        let temp = TempDir::new().unwrap();
        let share = LocalShare::open(temp.path()).unwrap();
        let factory = LocalShareFactory::new().with_share("fileserver", share);
        let mut config = ConnectorConfig::new(ConnectionConfig::new("fileserver"));
        config.pool.max_sessions = 0;
        assert!(matches!(
            Connector::new(config, Arc::new(factory)),
            Err(ConnectorError::Configuration(_))
        ));
    }
}
