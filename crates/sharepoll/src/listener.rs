//! Polling directory listener
//!
//! Each tick checks out a session, lists the watched directory, filters the
//! entries through the matcher and the watermark store, and dispatches the
//! rest to the consumer one file at a time:
//!
//! ```text
//! IDLE ──tick──▶ POLLING ──matches──▶ DISPATCHING ──▶ IDLE
//!                   │                      │
//!                   └──session broken──────┴──▶ UNAVAILABLE ──backoff──▶ POLLING
//! ```
//!
//! The watermark store outlives outages, so files delivered before the share
//! went away are not delivered again once it comes back.

use crate::client::FileAttributes;
use crate::config::ListenerConfig;
use crate::connection::FileSystemConnection;
use crate::consumer::{FileConsumer, FileMessage};
use crate::error::Result;
use crate::lock::LockProvider;
use crate::matcher::FileMatcher;
use crate::pool::SessionPool;
use crate::post_action::{Outcome, PostActionExecutor};
use crate::scheduler::{CancellationToken, ScheduledTask, Scheduler};
use crate::watermark::{FileIdentity, WatermarkStore};
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerState {
    Idle,
    Polling,
    Dispatching,
    Unavailable,
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Idle => "IDLE",
            ListenerState::Polling => "POLLING",
            ListenerState::Dispatching => "DISPATCHING",
            ListenerState::Unavailable => "UNAVAILABLE",
            ListenerState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub listed: usize,
    pub matched: usize,
    /// Matched but already delivered
    pub skipped: usize,
    pub dispatched: usize,
    pub failed: usize,
}

struct ListenerShared {
    name: String,
    state: Mutex<ListenerState>,
    watermarks: Arc<WatermarkStore>,
    polls: AtomicU64,
}

impl ListenerShared {
    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ListenerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous != next {
            *state = next;
            debug!(listener = %self.name, from = %previous, to = %next, "Listener state change");
        }
    }
}

/// Observer for a running listener.
#[derive(Clone)]
pub struct ListenerHandle {
    shared: Arc<ListenerShared>,
}

impl ListenerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    pub fn watermarks(&self) -> Arc<WatermarkStore> {
        Arc::clone(&self.shared.watermarks)
    }

    /// Completed poll cycles, successful or not.
    pub fn polls(&self) -> u64 {
        self.shared.polls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

pub struct DirectoryListener {
    config: ListenerConfig,
    shared: Arc<ListenerShared>,
    task: Option<ScheduledTask>,
}

impl DirectoryListener {
    /// Validate `config` and start polling on `scheduler`.
    pub fn start(
        config: ListenerConfig,
        pool: SessionPool,
        locks: Arc<dyn LockProvider>,
        consumer: Arc<dyn FileConsumer>,
        scheduler: &dyn Scheduler,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = match &config.matcher {
            Some(criteria) => FileMatcher::new(criteria.clone())?,
            None => FileMatcher::accept_all(),
        };
        let post_actions = PostActionExecutor::new(config.post_action.clone())?;

        let shared = Arc::new(ListenerShared {
            name: config.name.clone(),
            state: Mutex::new(ListenerState::Idle),
            watermarks: Arc::new(WatermarkStore::new()),
            polls: AtomicU64::new(0),
        });

        let mut poller = Poller {
            config: config.clone(),
            matcher,
            post_actions,
            pool,
            locks,
            consumer,
            shared: Arc::clone(&shared),
            failures: 0,
        };
        let span = info_span!("listener", listener = %config.name);
        let task = scheduler.schedule(
            &config.name,
            Box::new(move |token: &CancellationToken| {
                let _enter = span.enter();
                poller.tick(token)
            }),
        )?;

        info!(
            listener = %config.name,
            directory = %config.directory,
            recursive = config.recursive,
            poll_interval_ms = config.poll_interval_ms,
            "Listener started"
        );
        Ok(Self {
            config,
            shared,
            task: Some(task),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    pub fn watermarks(&self) -> Arc<WatermarkStore> {
        Arc::clone(&self.shared.watermarks)
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Poll now instead of waiting for the next tick.
    pub fn poll_now(&self) {
        if let Some(task) = &self.task {
            task.trigger();
        }
    }

    /// Cancel future ticks and wait for the file in flight to finish.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
            self.shared.set_state(ListenerState::Stopped);
            info!(listener = %self.config.name, "Listener stopped");
        }
    }
}

impl Drop for DirectoryListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DirectoryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryListener")
            .field("name", &self.config.name)
            .field("directory", &self.config.directory)
            .field("state", &self.state())
            .finish()
    }
}

struct Poller {
    config: ListenerConfig,
    matcher: FileMatcher,
    post_actions: PostActionExecutor,
    pool: SessionPool,
    locks: Arc<dyn LockProvider>,
    consumer: Arc<dyn FileConsumer>,
    shared: Arc<ListenerShared>,
    failures: u32,
}

impl Poller {
    fn tick(&mut self, token: &CancellationToken) -> Duration {
        self.shared.set_state(ListenerState::Polling);
        let delay = match self.poll_once(token) {
            Ok(stats) => {
                if self.failures > 0 {
                    info!(after_failures = self.failures, "Share reachable again");
                }
                self.failures = 0;
                self.shared.set_state(ListenerState::Idle);
                debug!(
                    listed = stats.listed,
                    matched = stats.matched,
                    skipped = stats.skipped,
                    dispatched = stats.dispatched,
                    failed = stats.failed,
                    "Poll complete"
                );
                self.config.poll_interval()
            }
            Err(e) if e.is_session_broken() => {
                self.failures = self.failures.saturating_add(1);
                self.shared.set_state(ListenerState::Unavailable);
                let delay = self.backoff();
                warn!(
                    error = %e,
                    failures = self.failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Share unavailable"
                );
                delay
            }
            Err(e) => {
                self.failures = 0;
                self.shared.set_state(ListenerState::Idle);
                warn!(error = %e, "Poll failed");
                self.config.poll_interval()
            }
        };
        self.shared.polls.fetch_add(1, Ordering::SeqCst);
        delay
    }

    /// `poll_interval * 2^failures`, capped at `max_backoff`.
    fn backoff(&self) -> Duration {
        let factor = 1u32 << self.failures.min(16);
        self.config
            .poll_interval()
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.config.max_backoff())
    }

    fn poll_once(&mut self, token: &CancellationToken) -> Result<PollStats> {
        let session = self.pool.checkout()?;
        let mut conn = FileSystemConnection::new(session, Arc::clone(&self.locks));
        let result = self.poll_with(&mut conn, token);
        if let Err(e) = conn.close() {
            debug!(error = %e, "Session not returned to the pool");
        }
        result
    }

    fn poll_with(
        &mut self,
        conn: &mut FileSystemConnection,
        token: &CancellationToken,
    ) -> Result<PollStats> {
        let entries = conn.list(&self.config.directory, self.config.recursive)?;
        let mut stats = PollStats {
            listed: entries.len(),
            ..PollStats::default()
        };

        let mut pending = Vec::new();
        for attrs in entries {
            if attrs.is_directory() || !self.matcher.matches(&attrs) {
                continue;
            }
            stats.matched += 1;
            if self.shared.watermarks.contains(&FileIdentity::of(&attrs)) {
                stats.skipped += 1;
                continue;
            }
            pending.push(attrs);
        }
        if pending.is_empty() {
            return Ok(stats);
        }

        self.shared.set_state(ListenerState::Dispatching);
        for attrs in pending {
            if token.is_cancelled() {
                debug!("Listener stopping, leaving remaining files for the next start");
                break;
            }
            match self.dispatch(conn, &attrs) {
                Ok(()) => stats.dispatched += 1,
                Err(e) if e.is_session_broken() => return Err(e),
                Err(e) => {
                    stats.failed += 1;
                    warn!(path = %attrs.path, error = %e, "File dispatch failed");
                }
            }
        }
        Ok(stats)
    }

    /// Read, consume and post-process one file while holding the locks for
    /// the file and its post-action destination.
    fn dispatch(&self, conn: &mut FileSystemConnection, attrs: &FileAttributes) -> Result<()> {
        let path = attrs.path.as_str();
        let held = self.post_actions.lock_set(conn, path)?;
        let held: Vec<&str> = held.iter().map(String::as_str).collect();
        let _guards = conn.lock_resolved(&held);

        let resolved = conn.resolve(path)?;
        let payload = conn.read_unlocked(&resolved)?;
        debug!(path, bytes = payload.len(), "Dispatching file");
        let outcome = self.consume(FileMessage {
            attributes: attrs.clone(),
            payload,
        });

        let applied = self.post_actions.apply_locked(conn, path, outcome);
        self.shared.watermarks.insert(FileIdentity::of(attrs));
        let action = applied?;
        debug!(path, ?outcome, action = %action, "File processed");
        Ok(())
    }

    /// A panicking consumer counts as a failed delivery.
    fn consume(&self, message: FileMessage) -> Outcome {
        let path = message.attributes.path.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| self.consumer.consume(message))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(path = %path, "Consumer panicked");
                Outcome::Failure
            }
        }
    }
}
