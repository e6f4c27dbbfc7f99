//! Treeline Monitor - live git worktree status watcher.
//!
//! This crate keeps a live snapshot of one git worktree: its change-set, a
//! derived mood, a headline describing the work in flight and a short
//! status note written by agents or scripts.
//!
//! # Overview
//!
//! A [`WorktreeMonitor`] polls its worktree on an adaptive schedule, detects
//! changes by hashing the change-set, commits every derived field in one
//! atomic snapshot swap and publishes exactly one snapshot per committed
//! state. Slow repositories push the poll interval out; repeated failures
//! trip a circuit breaker that only an explicit reset clears.
//!
//! All outside knowledge comes through collaborator traits so embedders can
//! swap them out:
//!
//! - [`fetcher::ChangeSetFetcher`]: change-sets and commit subjects
//! - [`mood::MoodClassifier`]: mood derivation
//! - [`summary::SummaryGenerator`]: AI headlines (may be unavailable)
//! - [`issue::IssueResolver`]: issue lookup when the branch name has none
//! - [`bus::Publisher`]: snapshot delivery
//!
//! # Modules
//!
//! - [`monitor`]: The per-worktree monitor and its update cycle
//! - [`scheduler`]: Poll phase state machine, backoff and circuit breaker
//! - [`summary`]: Summary generator interface and debounce/dedup bookkeeping
//! - [`note`]: Status note reader
//! - [`issue`]: Issue-number extraction
//! - [`git`]: `git` CLI backed change-set fetcher
//! - [`bus`]: Publisher trait and broadcast bus
//! - [`hash`]: Change-set state hash
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations
//! - [`types`]: Snapshot and change-set types
//! - [`utils`]: Shared utilities (timers)

pub mod bus;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod git;
pub mod hash;
pub mod issue;
pub mod monitor;
pub mod mood;
pub mod note;
pub mod scheduler;
pub mod summary;
pub mod types;
pub mod utils;

pub use bus::{BroadcastPublisher, Publisher, RefreshRequest, WorktreeEvent};
pub use config::{Config, ConfigError};
pub use error::{MonitorError, Result};
pub use fetcher::{ChangeSetFetcher, FetchError};
pub use monitor::{Collaborators, CycleOutcome, SkipReason, Transition, WorktreeMonitor};
pub use scheduler::{next_poll_delay, PollPhase};
pub use types::{
    AiStatus, ChangeSet, FileChange, FileStatus, Mood, Note, PullRequestLink, PullRequestState,
    WorktreeIdentity, WorktreeState,
};
