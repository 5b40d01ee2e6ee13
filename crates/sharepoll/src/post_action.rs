//! Post-processing of delivered files: delete, move, rename.

use crate::connection::FileSystemConnection;
use crate::error::{ConnectorError, Result};
use crate::paths;
use crate::transfer::{self, CopyMode, CopyOptions, TransferEndpoints};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Result reported by the consumer for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Post-action group of a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostActionConfig {
    /// Delete the file once processed. Takes precedence over a move.
    pub auto_delete: bool,
    pub move_to_directory: Option<String>,
    /// New name for the moved file
    pub rename_to: Option<String>,
    pub apply_post_action_when_failed: bool,
}

impl Default for PostActionConfig {
    fn default() -> Self {
        Self {
            auto_delete: false,
            move_to_directory: None,
            rename_to: None,
            apply_post_action_when_failed: true,
        }
    }
}

impl PostActionConfig {
    pub fn delete() -> Self {
        Self {
            auto_delete: true,
            ..Self::default()
        }
    }

    pub fn move_to(directory: impl Into<String>) -> Self {
        Self {
            move_to_directory: Some(directory.into()),
            ..Self::default()
        }
    }

    pub fn with_rename_to(mut self, name: impl Into<String>) -> Self {
        self.rename_to = Some(name.into());
        self
    }

    pub fn with_apply_when_failed(mut self, apply: bool) -> Self {
        self.apply_post_action_when_failed = apply;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.rename_to {
            if self.move_to_directory.is_none() {
                return Err(ConnectorError::config(
                    "post_action.rename_to requires post_action.move_to_directory",
                ));
            }
            paths::validate_name(name)?;
        }
        if let Some(dir) = &self.move_to_directory {
            paths::resolve(None, dir)?;
        }
        Ok(())
    }

    /// What should happen to a file processed with `outcome`.
    pub fn plan(&self, outcome: Outcome) -> PostAction {
        if outcome == Outcome::Failure && !self.apply_post_action_when_failed {
            return PostAction::None;
        }
        if self.auto_delete {
            return PostAction::Delete;
        }
        match &self.move_to_directory {
            Some(directory) => PostAction::Move {
                directory: directory.clone(),
                rename_to: self.rename_to.clone(),
            },
            None => PostAction::None,
        }
    }
}

/// A planned (or applied) post-action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    None,
    Delete,
    Move {
        directory: String,
        rename_to: Option<String>,
    },
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostAction::None => f.write_str("none"),
            PostAction::Delete => f.write_str("delete"),
            PostAction::Move {
                directory,
                rename_to: Some(name),
            } => write!(f, "move to '{directory}' as '{name}'"),
            PostAction::Move { directory, .. } => write!(f, "move to '{directory}'"),
        }
    }
}

pub struct PostActionExecutor {
    config: PostActionConfig,
}

impl PostActionExecutor {
    pub fn new(config: PostActionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PostActionConfig {
        &self.config
    }

    fn move_options(&self) -> CopyOptions {
        CopyOptions {
            overwrite: false,
            create_parent_directories: true,
            rename_to: self.config.rename_to.clone(),
        }
    }

    /// Share-absolute paths a post-action for `path` may touch: the file and,
    /// for a move, its destination.
    pub(crate) fn lock_set(&self, conn: &FileSystemConnection, path: &str) -> Result<Vec<String>> {
        let mut held = vec![conn.resolve(path)?];
        if !self.config.auto_delete {
            if let Some(directory) = &self.config.move_to_directory {
                let endpoints =
                    TransferEndpoints::resolve(conn, path, directory, &self.move_options())?;
                held.push(endpoints.target);
            }
        }
        Ok(held)
    }

    /// Apply the post-action for `path`. Returns what was actually done; a
    /// file that is already gone is left alone.
    pub fn apply(
        &self,
        conn: &mut FileSystemConnection,
        path: &str,
        outcome: Outcome,
    ) -> Result<PostAction> {
        let held = self
            .lock_set(conn, path)
            .map_err(|e| ConnectorError::post_action("lock", path, e))?;
        let held: Vec<&str> = held.iter().map(String::as_str).collect();
        let _guards = conn.lock_resolved(&held);
        self.apply_locked(conn, path, outcome)
    }

    /// [`Self::apply`] for a caller already holding every lock in
    /// [`Self::lock_set`].
    pub(crate) fn apply_locked(
        &self,
        conn: &mut FileSystemConnection,
        path: &str,
        outcome: Outcome,
    ) -> Result<PostAction> {
        let plan = self.config.plan(outcome);
        if plan == PostAction::None {
            return Ok(PostAction::None);
        }

        let source = conn
            .resolve(path)
            .map_err(|e| ConnectorError::post_action("stat", path, e))?;
        let exists = conn
            .raw_stat("stat", &source)
            .map_err(|e| ConnectorError::post_action("stat", path, e))?
            .is_some();
        if !exists {
            debug!(path, action = %plan, "File already gone, skipping post-action");
            return Ok(PostAction::None);
        }

        match &plan {
            PostAction::None => {}
            PostAction::Delete => {
                conn.raw_delete("delete", &source)
                    .map_err(|e| ConnectorError::post_action("delete", path, e))?;
            }
            PostAction::Move { directory, .. } => {
                let options = self.move_options();
                TransferEndpoints::resolve(conn, path, directory, &options)
                    .and_then(|endpoints| {
                        transfer::execute(conn, &endpoints, CopyMode::Move, &options)
                    })
                    .map_err(|e| ConnectorError::post_action("move", path, e))?;
            }
        }
        info!(path, ?outcome, action = %plan, "Post-action applied");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PostActionConfig::default();
        assert!(!config.auto_delete);
        assert!(config.apply_post_action_when_failed);
        assert_eq!(config.plan(Outcome::Success), PostAction::None);
    }

    #[test]
    fn test_plan_table() {
        let delete = PostActionConfig::delete();
        assert_eq!(delete.plan(Outcome::Success), PostAction::Delete);
        assert_eq!(delete.plan(Outcome::Failure), PostAction::Delete);

        let guarded = PostActionConfig::delete().with_apply_when_failed(false);
        assert_eq!(guarded.plan(Outcome::Success), PostAction::Delete);
        assert_eq!(guarded.plan(Outcome::Failure), PostAction::None);

        let moved = PostActionConfig::move_to("done").with_rename_to("x.txt");
        assert_eq!(
            moved.plan(Outcome::Success),
            PostAction::Move {
                directory: "done".to_string(),
                rename_to: Some("x.txt".to_string()),
            }
        );

        let both = PostActionConfig {
            auto_delete: true,
            move_to_directory: Some("done".to_string()),
            ..PostActionConfig::default()
        };
        assert_eq!(both.plan(Outcome::Success), PostAction::Delete);
    }

    #[test]
    fn test_validation() {
        assert!(PostActionConfig::default().validate().is_ok());
        assert!(PostActionConfig::default().with_rename_to("x").validate().is_err());
        assert!(PostActionConfig::move_to("done").with_rename_to("a/b").validate().is_err());
        assert!(PostActionConfig::move_to("../outside").validate().is_err());
        assert!(PostActionExecutor::new(PostActionConfig::move_to("done")).is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(PostAction::Delete.to_string(), "delete");
        let moved = PostAction::Move {
            directory: "done".to_string(),
            rename_to: None,
        };
        assert_eq!(moved.to_string(), "move to 'done'");
    }
}
