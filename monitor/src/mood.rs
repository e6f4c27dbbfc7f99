//! Mood classification.
//!
//! A [`MoodClassifier`] turns a worktree's metadata and change-set into a
//! coarse [`Mood`]. The monitor treats classifier failures as an `error`
//! mood rather than failing the cycle.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::types::{ChangeSet, FileStatus, Mood};

/// Files changed at or above which a change-set counts as complicated.
const COMPLICATED_FILE_COUNT: usize = 25;

/// Changed lines at or above which a change-set counts as complicated.
const COMPLICATED_LINE_COUNT: u32 = 800;

/// Days without activity after which uncommitted work is stale.
const STALE_AFTER_DAYS: i64 = 7;

/// Errors a mood classifier can report.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("mood classification failed: {0}")]
    Failed(String),
}

/// Inputs to a mood classification.
#[derive(Debug, Clone, Copy)]
pub struct MoodInput<'a> {
    pub path: &'a Path,
    pub branch: Option<&'a str>,
    pub last_activity: Option<DateTime<Utc>>,
    pub change_set: Option<&'a ChangeSet>,
    /// Name of the reference ("main") branch.
    pub main_branch: &'a str,
}

/// Derives a [`Mood`] from worktree metadata.
#[async_trait]
pub trait MoodClassifier: Send + Sync {
    async fn classify(&self, input: MoodInput<'_>) -> Result<Mood, ClassifyError>;
}

/// Rule-based classifier over change counts, conflicts and activity age.
#[derive(Debug, Clone)]
pub struct HeuristicMoodClassifier {
    stale_after: Duration,
}

impl Default for HeuristicMoodClassifier {
    fn default() -> Self {
        Self {
            stale_after: Duration::days(STALE_AFTER_DAYS),
        }
    }
}

impl HeuristicMoodClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how long uncommitted work may sit before it is stale.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Classifies against an explicit "now", for deterministic callers.
    #[must_use]
    pub fn classify_at(&self, input: &MoodInput<'_>, now: DateTime<Utc>) -> Mood {
        let Some(changes) = input.change_set.filter(|c| !c.is_empty()) else {
            return Mood::Stable;
        };

        let conflicted = changes
            .changes
            .iter()
            .any(|c| c.status == FileStatus::Conflicted);
        if conflicted
            || changes.len() >= COMPLICATED_FILE_COUNT
            || changes.insertions.saturating_add(changes.deletions) >= COMPLICATED_LINE_COUNT
        {
            return Mood::Complicated;
        }

        // Work on the reference branch never goes stale.
        let on_main = input.branch == Some(input.main_branch);
        if !on_main {
            if let Some(last) = input.last_activity {
                if now.signed_duration_since(last) >= self.stale_after {
                    return Mood::Stale;
                }
            }
        }

        Mood::Active
    }
}

#[async_trait]
impl MoodClassifier for HeuristicMoodClassifier {
    async fn classify(&self, input: MoodInput<'_>) -> Result<Mood, ClassifyError> {
        Ok(self.classify_at(&input, Utc::now()))
    }
}
