//! Shared logging setup for sharepoll binaries.

mod rolling;

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use rolling::SharedRollingWriter;

const DEFAULT_LOG_FILTER: &str = "sharepoll=info,sharepoll_logging=info";
const VERBOSE_LOG_FILTER: &str = "sharepoll=debug,sharepoll_logging=debug";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a sharepoll binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Overrides `~/.sharepoll/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
///
/// `RUST_LOG` wins over the built-in filters when set.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => ensure_logs_dir().context("Failed to ensure log directory")?,
    };
    let file_writer =
        SharedRollingWriter::new(log_dir, config.app_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .context("Failed to initialize rolling log writer")?;

    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(())
}

/// Sharepoll home directory.
///
/// Priority:
/// 1) SHAREPOLL_HOME
/// 2) ~/.sharepoll
/// 3) ./.sharepoll
pub fn sharepoll_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SHAREPOLL_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".sharepoll"))
        .unwrap_or_else(|| PathBuf::from(".").join(".sharepoll"))
}

/// Logs directory: ~/.sharepoll/logs
pub fn logs_dir() -> PathBuf {
    sharepoll_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
