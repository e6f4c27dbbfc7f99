//! Summary generation interface and scheduling bookkeeping.
//!
//! Generation itself is delegated to a [`SummaryGenerator`]. This module
//! owns the rules for *when* a generation may run, kept in a
//! [`SummaryTracker`]:
//!
//! - **Coalesce**: at most one generation is in flight. An immediate trigger
//!   that arrives while one is running only sets a pending flag; when the
//!   running generation finishes, a pending flag turns into a debounced run.
//! - **Debounce**: scheduled triggers share a single timer. A trigger that
//!   arrives while the timer is pending leaves it running.
//! - **Dedup**: a generation is skipped when the change-set hash equals the
//!   hash recorded at the last successful generation, unless forced.
//!
//! The monitor drives the tracker from its update cycle and publishes every
//! AI-status transition.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ChangeSet;
use crate::utils::timer::TimerSlot;

/// Errors a summary generator can report.
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Whether a generator can be used at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// No credential is configured, or the backend is switched off.
    Unavailable { reason: String },
}

impl Availability {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Inputs to one summary generation.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub path: &'a Path,
    pub branch: Option<&'a str>,
    pub main_branch: &'a str,
    pub change_set: &'a ChangeSet,
}

/// Result of a generation attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Generated {
        summary: String,
        /// Number of files the generator considered.
        modified_count: usize,
    },
    /// The generator declined; not an error.
    Unavailable,
}

/// Produces a short headline describing in-flight work.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    /// Credential check, consulted before every generation.
    fn availability(&self) -> Availability;

    async fn generate(&self, request: SummaryRequest<'_>) -> Result<SummaryOutcome, SummaryError>;
}

/// Generator used when no AI backend is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledSummaryGenerator;

#[async_trait]
impl SummaryGenerator for DisabledSummaryGenerator {
    fn availability(&self) -> Availability {
        Availability::Unavailable {
            reason: "no summary backend configured".to_string(),
        }
    }

    async fn generate(&self, _request: SummaryRequest<'_>) -> Result<SummaryOutcome, SummaryError> {
        Ok(SummaryOutcome::Unavailable)
    }
}

/// Outcome of asking the tracker to start a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The caller now owns the in-flight slot.
    Started,
    /// Another generation is running; a follow-up pass was recorded.
    Coalesced,
    /// The change-set was already summarized.
    Duplicate,
}

/// Debounce, coalescing and dedup state for one monitor.
#[derive(Debug, Default)]
pub struct SummaryTracker {
    in_flight: bool,
    pending: bool,
    last_generated_hash: Option<String>,
    debounce: TimerSlot,
}

impl SummaryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub fn last_generated_hash(&self) -> Option<&str> {
        self.last_generated_hash.as_deref()
    }

    /// Timer used for debounced generations.
    pub fn debounce_mut(&mut self) -> &mut TimerSlot {
        &mut self.debounce
    }

    #[must_use]
    pub fn is_debounce_armed(&self) -> bool {
        self.debounce.is_armed()
    }

    /// Tries to take the in-flight slot for a generation over `hash`.
    pub fn begin(&mut self, hash: &str, force: bool) -> BeginOutcome {
        if self.in_flight {
            self.pending = true;
            return BeginOutcome::Coalesced;
        }
        if !force && self.last_generated_hash.as_deref() == Some(hash) {
            return BeginOutcome::Duplicate;
        }
        self.in_flight = true;
        BeginOutcome::Started
    }

    /// Records that the generation over `hash` succeeded.
    pub fn record_success(&mut self, hash: String) {
        self.last_generated_hash = Some(hash);
    }

    /// Releases the in-flight slot.
    ///
    /// Returns true if a trigger was coalesced while running, in which case
    /// the caller should schedule another (debounced) pass.
    pub fn finish(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.pending)
    }

    /// Forgets everything tied to the current dirty period.
    ///
    /// Called when the worktree becomes clean: cancels a pending debounce
    /// and clears the last-generation hash so the next dirty transition is
    /// treated as fresh.
    pub fn reset_for_clean(&mut self) -> bool {
        self.last_generated_hash = None;
        self.pending = false;
        self.debounce.cancel()
    }
}
