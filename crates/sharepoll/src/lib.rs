//! Sharepoll - pooled share connector and directory listener
//!
//! Sharepoll keeps authenticated sessions to a remote file share, exposes file
//! operations relative to a share root, and polls directories for new or
//! changed files which are handed to a consumer and then post-processed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │   Session   │     │   Session   │     │  FileSystem  │     │   Directory   │
//! │   Manager   │────▶│    Pool     │────▶│  Connection  │────▶│   Listener    │
//! │ (connect/   │     │ (validate   │     │ (share root, │     │ (matcher →    │
//! │  validate)  │     │  on return) │     │  path locks) │     │  consumer →   │
//! └─────────────┘     └─────────────┘     └──────────────┘     │  post-action) │
//!                                                              └───────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Session**: one authenticated [`RemoteClient`] handle, checked out exclusively
//! - **FileMatcher**: pure predicate over [`FileAttributes`]
//! - **WatermarkStore**: identities already delivered by one listener
//! - **Post-action**: delete / move / rename applied after processing

pub mod backend;
pub mod client;
pub mod config;
pub mod connection;
pub mod connector;
pub mod consumer;
pub mod error;
pub mod listener;
pub mod lock;
pub mod matcher;
pub mod paths;
pub mod pool;
pub mod post_action;
pub mod scheduler;
pub mod session;
pub mod transfer;
pub mod watermark;

// Re-exports for convenience
pub use backend::{LocalShare, LocalShareFactory};
pub use client::{ClientError, ClientFactory, FileAttributes, FileKind, RemoteClient, WriteMode};
pub use config::{ConnectionConfig, ConnectorConfig, ListenerConfig, LogLevel, PoolConfig, Secret};
pub use connection::FileSystemConnection;
pub use connector::Connector;
pub use consumer::{ChannelConsumer, FileConsumer, FileMessage};
pub use error::{ConnectionError, ConnectorError, Result};
pub use listener::{DirectoryListener, ListenerHandle, ListenerState, PollStats};
pub use lock::{LockProvider, PathLockGuard, PathLocks};
pub use matcher::{FileMatcher, MatchPolicy, MatcherCriteria};
pub use pool::{PooledSession, SessionPool};
pub use post_action::{Outcome, PostAction, PostActionConfig, PostActionExecutor};
pub use scheduler::{CancellationToken, ScheduledTask, Scheduler, ThreadScheduler};
pub use session::{PoolingProvider, Session, SessionManager, ValidationResult};
pub use transfer::{CopyMode, CopyOptions};
pub use watermark::{FileIdentity, WatermarkStore};
