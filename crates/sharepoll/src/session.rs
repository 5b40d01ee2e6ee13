//! Session lifecycle: connect, validate, disconnect.

use crate::client::{ClientFactory, RemoteClient};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, ConnectorError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One authenticated handle to the share.
pub struct Session {
    id: Uuid,
    client: Box<dyn RemoteClient>,
    config: Arc<ConnectionConfig>,
}

impl Session {
    pub fn new(client: Box<dyn RemoteClient>, config: Arc<ConnectionConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn share_root(&self) -> Option<&str> {
        self.config.share_root.as_deref()
    }

    pub(crate) fn client(&mut self) -> &mut dyn RemoteClient {
        self.client.as_mut()
    }

    /// Ask the client whether the session still reaches the server.
    pub fn check_alive(&mut self) -> ValidationResult {
        if self.client.is_alive() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(format!(
                "connection to '{}' is no longer alive",
                self.config.host
            ))
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.config.host)
            .finish()
    }
}

/// Outcome of probing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Host capability the session pool is built on.
pub trait PoolingProvider: Send + Sync {
    fn connect(&self) -> Result<Session>;

    fn disconnect(&self, session: Session);

    fn validate(&self, session: &mut Session) -> ValidationResult;

    /// Called when a session comes back to the pool. Invalid sessions are
    /// rejected with an error instead of being pooled again.
    fn on_return(&self, session: &mut Session) -> Result<()> {
        match self.validate(session) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(cause) => {
                debug!(session = %session.id(), cause = %cause, "Rejecting invalid session");
                Err(ConnectorError::InvalidSessionReturned(format!(
                    "session {} to host '{}': {cause}",
                    session.id(),
                    session.config().host
                )))
            }
        }
    }
}

/// Creates and checks sessions for one [`ConnectionConfig`].
pub struct SessionManager {
    config: Arc<ConnectionConfig>,
    factory: Arc<dyn ClientFactory>,
}

impl SessionManager {
    pub fn new(config: ConnectionConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            factory,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn connection_error(&self, source: crate::client::ClientError) -> ConnectorError {
        let config = &self.config;
        ConnectionError {
            host: config.host.clone(),
            domain: config.domain.clone(),
            username: config.username.clone(),
            share_root: config.share_root.clone(),
            log_level: config.log_level,
            source,
        }
        .into()
    }
}

impl PoolingProvider for SessionManager {
    fn connect(&self) -> Result<Session> {
        let config = &self.config;
        debug!(
            host = %config.host,
            domain = config.domain.as_deref().unwrap_or(""),
            user = config.username.as_deref().unwrap_or(""),
            share_root = config.share_root.as_deref().unwrap_or(""),
            "Connecting to share"
        );

        let mut client = self
            .factory
            .create(&config.host, config.log_level)
            .map_err(|e| self.connection_error(e))?;
        if let Err(e) = client.login(
            config.domain.as_deref(),
            config.username.as_deref(),
            config.password.as_ref().map(|p| p.expose()),
        ) {
            client.disconnect();
            return Err(self.connection_error(e));
        }

        let session = Session::new(client, Arc::clone(&self.config));
        debug!(session = %session.id(), host = %config.host, "Session established");
        Ok(session)
    }

    fn disconnect(&self, mut session: Session) {
        debug!(session = %session.id(), "Disconnecting session");
        session.client().disconnect();
    }

    fn validate(&self, session: &mut Session) -> ValidationResult {
        session.check_alive()
    }
}
