//! Configuration for the connector
//!
//! Every component is built from these value objects; nothing reads ambient
//! state. [`ConnectorConfig::validate`] runs before any session is opened.

use crate::error::{ConnectorError, Result};
use crate::matcher::{FileMatcher, MatcherCriteria};
use crate::paths;
use crate::post_action::PostActionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::Duration;

/// Verbosity of the remote client for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Whether an event at `level` should be emitted under this threshold.
    pub fn allows(self, level: LogLevel) -> bool {
        level <= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Parameters for one share connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP address
    pub host: String,

    /// User domain, needed for NTLM style authentication
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<Secret>,

    /// Root of every relative path used with this connection
    #[serde(default)]
    pub share_root: Option<String>,

    #[serde(default)]
    pub log_level: LogLevel,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            domain: None,
            username: None,
            password: None,
            share_root: None,
            log_level: LogLevel::default(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(Secret::new(password));
        self
    }

    pub fn with_share_root(mut self, share_root: impl Into<String>) -> Self {
        self.share_root = Some(share_root.into());
        self
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::config("host must not be empty"));
        }
        if let Some(root) = &self.share_root {
            paths::normalize(root)?;
        }
        Ok(())
    }

    fn key(&self) -> (&str, Option<&str>, Option<&str>, Option<&Secret>, Option<&str>, LogLevel) {
        (
            &self.host,
            self.domain.as_deref(),
            self.username.as_deref(),
            self.password.as_ref(),
            self.share_root.as_deref(),
            self.log_level,
        )
    }
}

impl PartialEq for ConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ConnectionConfig {}

impl Hash for ConnectionConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Session pool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// How long `checkout` waits for a free session
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
}

fn default_max_sessions() -> usize {
    8
}

fn default_checkout_timeout_ms() -> u64 {
    30_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(ConnectorError::config("pool.max_sessions must be at least 1"));
        }
        Ok(())
    }
}

/// One directory listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,

    /// Directory to poll, relative to the share root
    pub directory: String,

    /// Whether subdirectories are polled too
    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for the retry delay while the share is unavailable
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub matcher: Option<MatcherCriteria>,

    #[serde(default)]
    pub post_action: PostActionConfig,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

impl ListenerConfig {
    pub fn new(name: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            recursive: true,
            poll_interval_ms: default_poll_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            matcher: None,
            post_action: PostActionConfig::default(),
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff_ms = max_backoff.as_millis() as u64;
        self
    }

    pub fn with_matcher(mut self, criteria: MatcherCriteria) -> Self {
        self.matcher = Some(criteria);
        self
    }

    pub fn with_post_action(mut self, post_action: PostActionConfig) -> Self {
        self.post_action = post_action;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.poll_interval_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConnectorError::config("listener name must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConnectorError::config(format!(
                "listener '{}': poll_interval_ms must be greater than zero",
                self.name
            )));
        }
        paths::normalize(&self.directory)?;
        if let Some(criteria) = &self.matcher {
            FileMatcher::new(criteria.clone())?;
        }
        self.post_action.validate()
    }
}

/// Main configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

impl ConnectorConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            pool: PoolConfig::default(),
            listeners: Vec::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConnectorConfig =
            toml::from_str(&content).map_err(|e| ConnectorError::config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConnectorError::config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.pool.validate()?;
        let mut names = HashSet::new();
        for listener in &self.listeners {
            listener.validate()?;
            if !names.insert(listener.name.as_str()) {
                return Err(ConnectorError::config(format!(
                    "duplicate listener name '{}'",
                    listener.name
                )));
            }
        }
        Ok(())
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerConfig> {
        self.listeners.iter().find(|l| l.name == name)
    }
}
