//! Session pool
//!
//! Bounded pool over a [`PoolingProvider`]. Idle sessions are validated when
//! borrowed; every returned session goes through `on_return` and is
//! disconnected instead of pooled when it is no longer valid.

use crate::config::PoolConfig;
use crate::error::{ConnectorError, Result};
use crate::session::{PoolingProvider, Session, ValidationResult};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

struct PoolState {
    idle: Vec<Session>,
    outstanding: usize,
    closed: bool,
}

struct PoolShared {
    provider: Arc<dyn PoolingProvider>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Shared handle to the pool. Clones refer to the same sessions.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    pub fn new(provider: Arc<dyn PoolingProvider>, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                provider,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    outstanding: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a session, waiting up to `checkout_timeout` for one to free up.
    pub fn checkout(&self) -> Result<PooledSession> {
        let timeout = self.shared.config.checkout_timeout();
        let deadline = Instant::now() + timeout;
        let provider = &self.shared.provider;

        loop {
            let mut state = self.state();
            if state.closed {
                return Err(ConnectorError::PoolClosed);
            }

            if let Some(mut session) = state.idle.pop() {
                state.outstanding += 1;
                drop(state);
                match provider.validate(&mut session) {
                    ValidationResult::Valid => return Ok(PooledSession::new(session, self.clone())),
                    ValidationResult::Invalid(cause) => {
                        debug!(session = %session.id(), cause = %cause, "Discarding stale idle session");
                        provider.disconnect(session);
                        self.free_slot();
                        continue;
                    }
                }
            }

            if state.outstanding < self.shared.config.max_sessions {
                state.outstanding += 1;
                drop(state);
                return match provider.connect() {
                    Ok(session) => Ok(PooledSession::new(session, self.clone())),
                    Err(e) => {
                        self.free_slot();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectorError::PoolExhausted(timeout));
            }
            let (state, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            drop(state);
        }
    }

    fn free_slot(&self) {
        let mut state = self.state();
        state.outstanding -= 1;
        self.shared.available.notify_all();
    }

    fn give_back(&self, mut session: Session) -> Result<()> {
        let provider = &self.shared.provider;
        if let Err(e) = provider.on_return(&mut session) {
            provider.disconnect(session);
            self.free_slot();
            return Err(e);
        }

        let mut state = self.state();
        state.outstanding -= 1;
        if state.closed {
            drop(state);
            provider.disconnect(session);
            self.shared.available.notify_all();
        } else {
            state.idle.push(session);
            self.shared.available.notify_all();
        }
        Ok(())
    }

    /// Refuse new checkouts, wait for borrowed sessions, disconnect the rest.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        self.shared.available.notify_all();
        while state.outstanding > 0 {
            state = self
                .shared
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let idle = std::mem::take(&mut state.idle);
        drop(state);

        let count = idle.len();
        for session in idle {
            self.shared.provider.disconnect(session);
        }
        info!(disconnected = count, "Session pool closed");
    }

    pub fn idle_count(&self) -> usize {
        self.state().idle.len()
    }

    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SessionPool")
            .field("max_sessions", &self.shared.config.max_sessions)
            .field("idle", &state.idle.len())
            .field("outstanding", &state.outstanding)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A session borrowed from a [`SessionPool`].
///
/// Use [`PooledSession::release`] to observe a rejected return; dropping
/// returns the session too but can only log the rejection.
pub struct PooledSession {
    session: Option<Session>,
    pool: SessionPool,
}

impl PooledSession {
    fn new(session: Session, pool: SessionPool) -> Self {
        Self {
            session: Some(session),
            pool,
        }
    }

    pub fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => self.pool.give_back(session),
            None => Ok(()),
        }
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session.as_ref().expect("pooled session used after release")
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("pooled session used after release")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id();
            if let Err(e) = self.pool.give_back(session) {
                warn!(session = %id, error = %e, "Pool rejected returned session");
            }
        }
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish()
    }
}
