//! Snapshot types for worktree monitoring.
//!
//! This module defines the data published to subscribers: the immutable
//! [`WorktreeState`] snapshot and the change-set it is derived from. All
//! types serialize to camelCase JSON so any transport can forward them as-is.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single file in a change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Untracked,
    Conflicted,
}

impl FileStatus {
    /// Stable lowercase name, used when hashing change-sets.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Copied => "copied",
            Self::Untracked => "untracked",
            Self::Conflicted => "conflicted",
        }
    }
}

/// One file-level modification between the working directory and HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path relative to the worktree root.
    pub path: String,
    pub status: FileStatus,
    pub insertions: u32,
    pub deletions: u32,
}

impl FileChange {
    #[must_use]
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
            insertions: 0,
            deletions: 0,
        }
    }

    /// Sets the line statistics for this change.
    #[must_use]
    pub fn with_lines(mut self, insertions: u32, deletions: u32) -> Self {
        self.insertions = insertions;
        self.deletions = deletions;
        self
    }
}

/// The set of uncommitted changes in a worktree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub changes: Vec<FileChange>,
    /// Total inserted lines across all changes.
    pub insertions: u32,
    /// Total deleted lines across all changes.
    pub deletions: u32,
}

impl ChangeSet {
    /// Builds a change-set, computing the line totals from the entries.
    ///
    /// Totals saturate at `u32::MAX`.
    #[must_use]
    pub fn new(changes: Vec<FileChange>) -> Self {
        let insertions = changes
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.insertions));
        let deletions = changes
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.deletions));
        Self {
            changes,
            insertions,
            deletions,
        }
    }

    /// Number of changed files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Coarse classification of a worktree's health and activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    /// Clean, nothing in flight.
    #[default]
    Stable,
    /// Uncommitted work of a normal size.
    Active,
    /// Large or conflicted change-set.
    Complicated,
    /// Uncommitted work that has not moved in a long time.
    Stale,
    /// The worktree could not be inspected.
    Error,
}

/// State of the AI summary feature for one worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    #[default]
    Active,
    Loading,
    /// No credential is configured; overrides every other status.
    Disabled,
    Error,
}

/// Lifecycle state of a linked pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Draft,
    Merged,
    Closed,
}

/// Pull request associated with the worktree's branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestLink {
    pub number: u64,
    pub url: String,
    pub state: PullRequestState,
}

/// A status note written into the worktree's metadata directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub text: String,
    /// Modification time of the note file.
    pub timestamp: DateTime<Utc>,
}

/// Immutable identity of a watched worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeIdentity {
    pub id: String,
    pub path: PathBuf,
}

impl WorktreeIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Full snapshot of one worktree, as published to subscribers.
///
/// A monitor never mutates a published snapshot: every committed cycle
/// builds a new value and swaps it in, so a subscriber holding an older
/// snapshot always sees mutually consistent fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeState {
    pub id: String,
    pub path: PathBuf,
    /// Display name, usually the directory or branch name.
    pub name: String,
    /// Checked-out branch, `None` when detached.
    pub branch: Option<String>,
    /// Whether this is the worktree the user is currently working in.
    pub is_current: bool,
    pub changes: Option<ChangeSet>,
    pub modified_count: usize,
    pub mood: Mood,
    /// Headline: an AI summary while dirty, the last commit subject when clean.
    pub summary: String,
    pub summary_loading: bool,
    pub ai_status: AiStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub note: Option<Note>,
    pub issue_number: Option<u64>,
    pub pull_request: Option<PullRequestLink>,
}

impl WorktreeState {
    /// Creates the initial snapshot for a worktree before its first cycle.
    #[must_use]
    pub fn initial(
        identity: &WorktreeIdentity,
        name: impl Into<String>,
        branch: Option<String>,
    ) -> Self {
        Self {
            id: identity.id.clone(),
            path: identity.path.clone(),
            name: name.into(),
            branch,
            is_current: false,
            changes: None,
            modified_count: 0,
            mood: Mood::Stable,
            summary: String::new(),
            summary_loading: false,
            ai_status: AiStatus::Active,
            last_activity: None,
            note: None,
            issue_number: None,
            pull_request: None,
        }
    }

    /// Returns true if the snapshot has uncommitted changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.modified_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> WorktreeState {
        let identity = WorktreeIdentity::new("wt-1", "/repo/feature");
        WorktreeState::initial(&identity, "feature", Some("feature/login".to_string()))
    }

    #[test]
    fn change_set_totals_are_summed() {
        let set = ChangeSet::new(vec![
            FileChange::new("a.rs", FileStatus::Modified).with_lines(10, 2),
            FileChange::new("b.rs", FileStatus::Added).with_lines(5, 0),
        ]);
        assert_eq!(set.insertions, 15);
        assert_eq!(set.deletions, 2);
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
    }

    #[test]
    fn change_set_totals_saturate() {
        let set = ChangeSet::new(vec![
            FileChange::new("generated.json", FileStatus::Added).with_lines(u32::MAX, 7),
            FileChange::new("schema.json", FileStatus::Added).with_lines(10, u32::MAX),
        ]);
        assert_eq!(set.insertions, u32::MAX);
        assert_eq!(set.deletions, u32::MAX);
    }

    #[test]
    fn initial_state_is_clean_and_stable() {
        let state = sample_state();
        assert_eq!(state.mood, Mood::Stable);
        assert_eq!(state.ai_status, AiStatus::Active);
        assert!(!state.is_dirty());
        assert!(state.changes.is_none());
    }

    #[test]
    fn state_serializes_to_camel_case() {
        let json = serde_json::to_value(sample_state()).unwrap();
        assert!(json.get("modifiedCount").is_some());
        assert!(json.get("summaryLoading").is_some());
        assert_eq!(json["aiStatus"], "active");
        assert_eq!(json["mood"], "stable");
    }

    #[test]
    fn file_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&FileStatus::Untracked).unwrap(),
            "\"untracked\""
        );
        assert_eq!(FileStatus::Conflicted.as_str(), "conflicted");
    }

    #[test]
    fn pull_request_round_trips() {
        let link = PullRequestLink {
            number: 42,
            url: "https://example.com/pr/42".to_string(),
            state: PullRequestState::Draft,
        };
        let json = serde_json::to_string(&link).unwrap();
        assert!(json.contains("\"draft\""));
        let back: PullRequestLink = serde_json::from_str(&json).unwrap();
        assert_eq!(back, link);
    }
}
