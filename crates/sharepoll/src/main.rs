//! Sharepoll CLI
//!
//! File operations and directory watching against a share served from a
//! local directory.
//!
//! Usage:
//!     sharepoll --share-dir /srv/share ls in --recursive
//!     sharepoll --config sharepoll.toml --share-dir /srv/share watch

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sharepoll::{
    ConnectionConfig, Connector, ConnectorConfig, CopyOptions, FileConsumer, FileMessage,
    ListenerConfig, LocalShare, LocalShareFactory, Outcome, WriteMode,
};
use sharepoll_logging::{init_logging, LogConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sharepoll", version, about = "Pooled share connector and directory listener")]
struct Cli {
    /// Connector configuration (TOML)
    #[arg(long, env = "SHAREPOLL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Local directory served as the share
    #[arg(long, env = "SHAREPOLL_SHARE_DIR", global = true)]
    share_dir: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        dir: String,
        #[arg(short, long)]
        recursive: bool,
        /// One JSON object per entry
        #[arg(long)]
        json: bool,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Upload a local file
    Put {
        path: String,
        local: PathBuf,
        #[arg(long, conflicts_with = "create_new")]
        append: bool,
        /// Fail if the file already exists
        #[arg(long)]
        create_new: bool,
        #[arg(long)]
        create_parents: bool,
    },
    /// Create a directory and its parents
    Mkdir { path: String },
    /// Delete a file or directory
    Rm { path: String },
    /// Rename in place
    Rename {
        path: String,
        new_name: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy into a directory
    Cp(TransferArgs),
    /// Move into a directory
    Mv(TransferArgs),
    /// Poll for new files and print one JSON line per delivery
    Watch {
        /// Listener from the configuration file; all of them when omitted
        #[arg(long, conflicts_with = "directory")]
        listener: Option<String>,
        /// Watch a directory without a configured listener
        #[arg(long)]
        directory: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct TransferArgs {
    source: String,
    target_dir: String,
    #[arg(long)]
    overwrite: bool,
    #[arg(long)]
    create_parents: bool,
    #[arg(long)]
    rename_to: Option<String>,
}

impl TransferArgs {
    fn options(&self) -> CopyOptions {
        CopyOptions {
            overwrite: self.overwrite,
            create_parent_directories: self.create_parents,
            rename_to: self.rename_to.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "sharepoll",
        verbose: cli.verbose,
        log_dir: None,
    })?;

    let config = match &cli.config {
        Some(path) => ConnectorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConnectorConfig::new(ConnectionConfig::new("localhost")),
    };
    let connector = build_connector(config, cli.share_dir.as_ref())?;

    let result = run(&connector, cli.command);
    connector.shutdown();
    result
}

fn build_connector(config: ConnectorConfig, share_dir: Option<&PathBuf>) -> Result<Connector> {
    let Some(share_dir) = share_dir else {
        bail!("No share directory; pass --share-dir or set SHAREPOLL_SHARE_DIR");
    };
    let connection = &config.connection;
    let share = match (&connection.username, &connection.password) {
        (Some(user), Some(password)) => LocalShare::open_with_credentials(
            share_dir,
            connection.domain.as_deref(),
            user,
            password.expose(),
        ),
        _ => LocalShare::open(share_dir),
    }
    .with_context(|| format!("Failed to open share directory {}", share_dir.display()))?;

    let factory = LocalShareFactory::new().with_share(connection.host.clone(), share);
    Connector::new(config, Arc::new(factory)).context("Invalid connector configuration")
}

fn run(connector: &Connector, command: Command) -> Result<()> {
    match command {
        Command::Ls {
            dir,
            recursive,
            json,
        } => {
            let entries = connector
                .list(&dir, recursive)
                .with_context(|| format!("Failed to list '{dir}'"))?;
            let mut out = io::stdout().lock();
            for entry in entries {
                if json {
                    writeln!(out, "{}", serde_json::to_string(&entry)?)?;
                } else {
                    let size = entry.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                    let modified = entry
                        .last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    let suffix = if entry.is_directory() { "/" } else { "" };
                    writeln!(out, "{size:>12}  {modified:19}  {}{suffix}", entry.path)?;
                }
            }
        }
        Command::Cat { path } => {
            let content = connector
                .read(&path)
                .with_context(|| format!("Failed to read '{path}'"))?;
            io::stdout().lock().write_all(&content)?;
        }
        Command::Put {
            path,
            local,
            append,
            create_new,
            create_parents,
        } => {
            let content = std::fs::read(&local)
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let mode = if append {
                WriteMode::Append
            } else if create_new {
                WriteMode::CreateNew
            } else {
                WriteMode::Overwrite
            };
            connector
                .write(&path, &content, mode, create_parents)
                .with_context(|| format!("Failed to write '{path}'"))?;
        }
        Command::Mkdir { path } => connector
            .create_directory(&path)
            .with_context(|| format!("Failed to create '{path}'"))?,
        Command::Rm { path } => connector
            .delete(&path)
            .with_context(|| format!("Failed to delete '{path}'"))?,
        Command::Rename {
            path,
            new_name,
            overwrite,
        } => connector
            .rename(&path, &new_name, overwrite)
            .with_context(|| format!("Failed to rename '{path}'"))?,
        Command::Cp(args) => {
            let target = connector
                .copy(&args.source, &args.target_dir, &args.options())
                .with_context(|| format!("Failed to copy '{}'", args.source))?;
            println!("{target}");
        }
        Command::Mv(args) => {
            let target = connector
                .move_file(&args.source, &args.target_dir, &args.options())
                .with_context(|| format!("Failed to move '{}'", args.source))?;
            println!("{target}");
        }
        Command::Watch {
            listener,
            directory,
        } => watch(connector, listener, directory)?,
    }
    Ok(())
}

fn print_delivery(message: FileMessage) -> Outcome {
    let line = serde_json::json!({
        "path": message.attributes.path,
        "size": message.attributes.size,
        "last_modified": message.attributes.last_modified,
        "bytes": message.payload.len(),
    });
    let mut out = io::stdout().lock();
    match writeln!(out, "{line}").and_then(|_| out.flush()) {
        Ok(()) => Outcome::Success,
        Err(_) => Outcome::Failure,
    }
}

fn watch(connector: &Connector, listener: Option<String>, directory: Option<String>) -> Result<()> {
    let consumer: Arc<dyn FileConsumer> = Arc::new(print_delivery);

    if let Some(dir) = directory {
        connector.start_listener(ListenerConfig::new("cli", dir), consumer)?;
    } else if let Some(name) = listener {
        let config = connector
            .config()
            .listener(&name)
            .cloned()
            .with_context(|| format!("No listener named '{name}' in the configuration"))?;
        connector.start_listener(config, consumer)?;
    } else {
        let started = connector.start_configured_listeners(consumer)?;
        if started.is_empty() {
            bail!("No listeners configured; pass --directory or add [[listeners]] to the config");
        }
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    info!("Watching, press Ctrl-C to stop");
    let _ = rx.recv();
    info!("Stopping listeners");
    Ok(())
}
