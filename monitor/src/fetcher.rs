//! Change-set fetcher interface.
//!
//! The monitor never talks to git directly; it asks a [`ChangeSetFetcher`]
//! for the current change-set and for the latest commit subject. Two failure
//! modes are distinguished because the monitor handles them specially:
//!
//! - [`FetchError::Removed`]: the worktree path is not accessible. The cycle
//!   degrades to an error mood but does not count as a failure.
//! - [`FetchError::Locked`]: another git process holds the index lock. The
//!   cycle is skipped silently and retried on the next poll.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ChangeSet;

/// Errors a change-set fetcher can report.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The worktree path no longer exists or cannot be accessed.
    #[error("worktree path is not accessible: {}", .0.display())]
    Removed(PathBuf),

    /// The git index is locked by another process.
    #[error("git index is locked")]
    Locked,

    /// A git command exited unsuccessfully.
    #[error("git command failed: {0}")]
    Command(String),

    /// Spawning a command or reading output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of change-sets for a worktree path.
#[async_trait]
pub trait ChangeSetFetcher: Send + Sync {
    /// Returns the current change-set of the worktree at `path`.
    ///
    /// When `force` is true any fetcher-side cache must be bypassed.
    async fn fetch(&self, path: &Path, force: bool) -> Result<ChangeSet, FetchError>;

    /// Returns the subject line of the latest commit, `None` if there is none.
    async fn last_commit_message(&self, path: &Path) -> Result<Option<String>, FetchError>;
}
