//! Test harness for integration tests
//!
//! Serves a temp directory as a share and builds a connector on top of it.
//!
//! ```ignore
//! let env = TestEnv::new();
//! env.write_file("in/a.txt", "data");
//! let (consumer, rx) = ChannelConsumer::bounded(64);
//! env.connector.start_listener(fast_listener("inbox", "in"), Arc::new(consumer))?;
//! let message = expect_message(&rx);
//! ```

#![allow(dead_code)]

use sharepoll::{
    ConnectionConfig, Connector, ConnectorConfig, FileMessage, ListenerConfig, LocalShare,
    LocalShareFactory,
};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const HOST: &str = "fileserver";
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestEnv {
    pub temp: TempDir,
    pub share: LocalShare,
    pub connector: Connector,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_connection(ConnectionConfig::new(HOST))
    }

    pub fn with_share_root(root: &str) -> Self {
        Self::with_connection(ConnectionConfig::new(HOST).with_share_root(root))
    }

    pub fn with_connection(connection: ConnectionConfig) -> Self {
        let temp = TempDir::new().expect("temp dir");
        if let Some(root) = &connection.share_root {
            fs::create_dir_all(temp.path().join(root)).expect("share root");
        }
        let share = LocalShare::open(temp.path()).expect("open share");
        let factory = LocalShareFactory::new().with_share(HOST, share.clone());
        let connector = Connector::new(ConnectorConfig::new(connection), Arc::new(factory))
            .expect("connector");
        Self {
            temp,
            share,
            connector,
        }
    }

    /// Path on disk, relative to the top of the share.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    pub fn read_file(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.connector.shutdown();
    }
}

/// Listener config with intervals short enough for tests.
pub fn fast_listener(name: &str, directory: &str) -> ListenerConfig {
    ListenerConfig::new(name, directory)
        .with_poll_interval(Duration::from_millis(50))
        .with_max_backoff(Duration::from_millis(200))
}

pub fn expect_message(rx: &Receiver<FileMessage>) -> FileMessage {
    rx.recv_timeout(DELIVERY_TIMEOUT)
        .expect("file was not delivered in time")
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
