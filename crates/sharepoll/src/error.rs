//! Error types for the connector

use crate::client::ClientError;
use crate::config::LogLevel;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Connect-time failure.
///
/// Carries every connection parameter except the password.
#[derive(Error, Debug)]
#[error(
    "Could not establish share connection (host: '{host}', domain: {}, user: {}, share root: '{}', logLevel: '{log_level}'): {source}",
    display_opt(.domain),
    display_opt(.username),
    .share_root.as_deref().unwrap_or("")
)]
pub struct ConnectionError {
    pub host: String,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub share_root: Option<String>,
    pub log_level: LogLevel,
    #[source]
    pub source: ClientError,
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("null")
}

/// Connector error type
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Operation '{op}' failed for '{path}': {source}")]
    Operation {
        op: &'static str,
        path: String,
        #[source]
        source: ClientError,
    },

    #[error("Post-action '{action}' failed for '{path}': {source}")]
    PostAction {
        action: &'static str,
        path: String,
        #[source]
        source: Box<ConnectorError>,
    },

    #[error("Session returned to the pool is invalid: {0}")]
    InvalidSessionReturned(String),

    #[error("No session available after waiting {0:?}")]
    PoolExhausted(Duration),

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn operation(op: &'static str, path: impl Into<String>, source: ClientError) -> Self {
        Self::Operation {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn post_action(action: &'static str, path: impl Into<String>, source: ConnectorError) -> Self {
        Self::PostAction {
            action,
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// True when the failure means the session (or the server behind it) is
    /// gone, as opposed to a single operation being rejected.
    pub fn is_session_broken(&self) -> bool {
        match self {
            Self::Connection(_) | Self::InvalidSessionReturned(_) => true,
            Self::Operation { source, .. } => source.is_session_broken(),
            Self::PostAction { source, .. } => source.is_session_broken(),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConnectorError>;
