//! Fixed-delay task scheduling for listeners.
//!
//! A task runs once immediately, then again after the delay it returns.
//! [`ScheduledTask::trigger`] cuts the current wait short.

use crate::error::Result;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Token for cooperative cancellation of a scheduled task.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Body of a scheduled task. Returns the delay before its next run.
pub type Task = Box<dyn FnMut(&CancellationToken) -> Duration + Send>;

/// Host capability running listener polls.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, name: &str, task: Task) -> Result<ScheduledTask>;
}

/// Handle to a running task. Dropping it cancels the task and waits for the
/// current run to finish.
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    wake: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        token: CancellationToken,
        wake: Sender<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            token,
            wake,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run the task now instead of waiting out the delay.
    pub fn trigger(&self) {
        let _ = self.wake.send(());
    }

    /// Stop future runs. A run in progress continues.
    pub fn cancel(&self) {
        self.token.cancel();
        let _ = self.wake.send(());
    }

    /// Cancel and wait for the task thread to exit.
    pub fn stop(mut self) {
        self.cancel();
        self.join();
    }

    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(task = %self.name, "Scheduled task panicked");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// One OS thread per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, name: &str, task: Task) -> Result<ScheduledTask> {
        let (wake_tx, wake_rx) = mpsc::channel();
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let task_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("sharepoll-{name}"))
            .spawn(move || run_task(&task_name, task, thread_token, wake_rx))?;
        debug!(task = name, "Scheduled task started");
        Ok(ScheduledTask::new(name, token, wake_tx, handle))
    }
}

fn run_task(name: &str, mut task: Task, token: CancellationToken, wake: Receiver<()>) {
    while !token.is_cancelled() {
        let delay = match panic::catch_unwind(AssertUnwindSafe(|| task(&token))) {
            Ok(delay) => delay,
            Err(_) => {
                error!(task = name, "Scheduled task panicked, not running it again");
                break;
            }
        };
        if token.is_cancelled() {
            break;
        }
        match wake.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counting_task(counter: Arc<AtomicUsize>, delay: Duration) -> Task {
        Box::new(move |_token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            delay
        })
    }

    fn wait_for(counter: &AtomicUsize, at_least: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_runs_immediately_and_repeats() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ThreadScheduler::new()
            .schedule("repeat", counting_task(counter.clone(), Duration::from_millis(10)))
            .unwrap();
        assert!(wait_for(&counter, 3));
        task.stop();
    }

    #[test]
    fn test_trigger_cuts_wait_short() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ThreadScheduler::new()
            .schedule("trigger", counting_task(counter.clone(), Duration::from_secs(60)))
            .unwrap();
        assert!(wait_for(&counter, 1));
        task.trigger();
        assert!(wait_for(&counter, 2));
        task.stop();
    }

    #[test]
    fn test_stop_prevents_further_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = ThreadScheduler::new()
            .schedule("stop", counting_task(counter.clone(), Duration::from_millis(5)))
            .unwrap();
        assert!(wait_for(&counter, 1));
        task.stop();
        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_panicking_task_is_not_rescheduled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runs = counter.clone();
        let task = ThreadScheduler::new()
            .schedule(
                "panics",
                Box::new(move |_token: &CancellationToken| -> Duration {
                    runs.fetch_add(1, Ordering::SeqCst);
                    panic!("task bug");
                }),
            )
            .unwrap();
        assert!(wait_for(&counter, 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        task.stop();
    }
}
