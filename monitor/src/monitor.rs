//! Per-worktree monitor.
//!
//! A [`WorktreeMonitor`] owns the current [`WorktreeState`] snapshot of one
//! worktree and keeps it fresh:
//!
//! - a self-rescheduling poll loop whose delay adapts to how long cycles
//!   take, with a circuit breaker that stops polling after repeated failures
//! - an update cycle that drafts every derived field first and then swaps
//!   the snapshot in one assignment, publishing exactly once
//! - out-of-band summary generation with debounce, coalescing and dedup
//! - branch metadata bookkeeping, including issue-number extraction
//!
//! # Update cycle
//!
//! 1. Fetch the change-set (forced cycles bypass fetcher caches).
//! 2. Hash it. An unforced cycle over an unchanged hash stops here.
//! 3. Classify the [`Transition`] from the previous change count.
//! 4. Clean: fetch the latest commit subject as the headline. Dirty: keep the
//!    current headline (or a placeholder) until a summary arrives.
//! 5. Classify the mood. Classifier failures become [`Mood::Error`].
//! 6. Read the status note.
//! 7. Commit the new snapshot and record the hash.
//! 8. Publish it.
//! 9. Trigger (first dirty cycle) or debounce (later dirty cycles) a summary,
//!    or cancel summary work when the worktree became clean.
//!
//! A monitor that is stopped while a cycle is suspended abandons the cycle
//! at the next resumption point without publishing or rescheduling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use treeline_monitor::bus::BroadcastPublisher;
//! use treeline_monitor::config::Config;
//! use treeline_monitor::git::GitCliFetcher;
//! use treeline_monitor::issue::NoopIssueResolver;
//! use treeline_monitor::monitor::{Collaborators, WorktreeMonitor};
//! use treeline_monitor::mood::HeuristicMoodClassifier;
//! use treeline_monitor::summary::DisabledSummaryGenerator;
//! use treeline_monitor::types::{WorktreeIdentity, WorktreeState};
//!
//! # async fn run() -> treeline_monitor::error::Result<()> {
//! let identity = WorktreeIdentity::new("feature", "/repo/feature");
//! let initial = WorktreeState::initial(&identity, "feature", Some("feature/42-login".into()));
//! let bus = BroadcastPublisher::new();
//!
//! let monitor = WorktreeMonitor::new(
//!     identity,
//!     initial,
//!     Config::default(),
//!     Collaborators {
//!         fetcher: Arc::new(GitCliFetcher::new()),
//!         classifier: Arc::new(HeuristicMoodClassifier::new()),
//!         generator: Arc::new(DisabledSummaryGenerator),
//!         issue_resolver: Arc::new(NoopIssueResolver),
//!         publisher: Arc::new(bus.clone()),
//!     },
//! )?;
//! monitor.start().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{Publisher, RefreshRequest, TOPIC_WORKTREE_UPDATE};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::{ChangeSetFetcher, FetchError};
use crate::hash::state_hash;
use crate::issue::{extract_issue_number, IssueResolver};
use crate::mood::{MoodClassifier, MoodInput};
use crate::note::NoteReader;
use crate::scheduler::{FailureVerdict, PollPhase, PollScheduler};
use crate::summary::{BeginOutcome, SummaryGenerator, SummaryOutcome, SummaryRequest, SummaryTracker};
use crate::types::{AiStatus, Mood, PullRequestLink, WorktreeIdentity, WorktreeState};
use crate::utils::timer::TimerSlot;

/// Headline shown while the first summary of a dirty period is generated.
pub const DIRTY_PLACEHOLDER: &str = "Summarizing changes...";

/// Headline for a clean worktree without commits.
pub const NO_COMMITS_HEADLINE: &str = "No commits yet";

/// Headline for a clean worktree whose latest commit could not be read.
pub const COMMIT_UNAVAILABLE_HEADLINE: &str = "Latest commit unavailable";

/// Headline while the worktree path is not accessible.
pub const REMOVED_HEADLINE: &str = "Worktree is not accessible";

/// How the dirty/clean state moved between two committed cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameDirty,
    BecameClean,
    StillDirty,
    StillClean,
}

impl Transition {
    /// Classifies by comparing change counts.
    #[must_use]
    pub fn classify(previous_count: usize, current_count: usize) -> Self {
        match (previous_count > 0, current_count > 0) {
            (false, true) => Self::BecameDirty,
            (true, false) => Self::BecameClean,
            (true, true) => Self::StillDirty,
            (false, false) => Self::StillClean,
        }
    }

    #[must_use]
    pub fn is_clean(self) -> bool {
        matches!(self, Self::BecameClean | Self::StillClean)
    }
}

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle was in flight; this call was dropped.
    InFlight,
    /// The git index was locked; the next poll retries.
    Locked,
    /// The monitor is not running.
    NotRunning,
    /// The circuit breaker is tripped.
    BreakerTripped,
}

/// Result of one update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new snapshot was committed and published.
    Committed(Transition),
    /// Unforced cycle over an unchanged change-set.
    Unchanged,
    Skipped(SkipReason),
    /// The worktree path was not accessible; an error snapshot was committed.
    Degraded,
    /// The monitor was stopped while the cycle was suspended.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Leaf collaborators a monitor delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ChangeSetFetcher>,
    pub classifier: Arc<dyn MoodClassifier>,
    pub generator: Arc<dyn SummaryGenerator>,
    pub issue_resolver: Arc<dyn IssueResolver>,
    pub publisher: Arc<dyn Publisher>,
}

/// Scheduling state, guarded by one short-lived lock.
#[derive(Debug)]
struct Control {
    lifecycle: Lifecycle,
    scheduler: PollScheduler,
    poll_timer: TimerSlot,
    summary: SummaryTracker,
    last_hash: Option<String>,
    refresh_listener: Option<JoinHandle<()>>,
}

impl Drop for Control {
    fn drop(&mut self) {
        if let Some(listener) = self.refresh_listener.take() {
            listener.abort();
        }
    }
}

struct MonitorInner {
    identity: WorktreeIdentity,
    state: Mutex<Arc<WorktreeState>>,
    cycle_lock: tokio::sync::Mutex<()>,
    control: Mutex<Control>,
    config: RwLock<Config>,
    collaborators: Collaborators,
    notes: NoteReader,
}

/// Monitors one worktree. Cheap to clone; clones share the same monitor.
#[derive(Clone)]
pub struct WorktreeMonitor {
    inner: Arc<MonitorInner>,
}

impl WorktreeMonitor {
    /// Creates a monitor in the created (not yet running) state.
    ///
    /// If `initial` carries no issue number, one is extracted from its
    /// branch name.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` if `config` fails validation.
    pub fn new(
        identity: WorktreeIdentity,
        mut initial: WorktreeState,
        config: Config,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        if initial.issue_number.is_none() {
            initial.issue_number = initial
                .branch
                .as_deref()
                .and_then(|branch| extract_issue_number(branch, &config.main_branch));
        }

        let notes = NoteReader::new(identity.path.clone());
        let inner = MonitorInner {
            identity,
            state: Mutex::new(Arc::new(initial)),
            cycle_lock: tokio::sync::Mutex::new(()),
            control: Mutex::new(Control {
                lifecycle: Lifecycle::Created,
                scheduler: PollScheduler::new(),
                poll_timer: TimerSlot::new(),
                summary: SummaryTracker::new(),
                last_hash: None,
                refresh_listener: None,
            }),
            config: RwLock::new(config),
            collaborators,
            notes,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[must_use]
    pub fn identity(&self) -> &WorktreeIdentity {
        &self.inner.identity
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get_state(&self) -> Arc<WorktreeState> {
        self.inner.current()
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.config()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.control().lifecycle == Lifecycle::Running
    }

    #[must_use]
    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.inner.control().scheduler.is_tripped()
    }

    #[must_use]
    pub fn poll_phase(&self) -> PollPhase {
        self.inner.control().scheduler.phase()
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.control().scheduler.consecutive_failures()
    }

    /// Returns true while a debounced summary generation is waiting.
    #[must_use]
    pub fn summary_debounce_pending(&self) -> bool {
        self.inner.control().summary.is_debounce_armed()
    }

    /// Starts monitoring: runs one forced cycle, then polls on a schedule.
    ///
    /// No-op if the monitor was already started or has been stopped. A
    /// failing initial cycle counts toward the circuit breaker like any
    /// other poll.
    pub async fn start(&self) {
        {
            let mut control = self.inner.control();
            if control.lifecycle != Lifecycle::Created {
                debug!(worktree = %self.inner.identity.id, "Monitor already started");
                return;
            }
            control.lifecycle = Lifecycle::Running;
        }
        info!(
            worktree = %self.inner.identity.id,
            path = %self.inner.identity.path.display(),
            "Starting worktree monitor"
        );

        if let Ok(outcome) = self.inner.timed_cycle(true).await {
            debug!(worktree = %self.inner.identity.id, ?outcome, "Initial cycle finished");
        }
    }

    /// Stops monitoring. Terminal.
    ///
    /// Cancels the poll and summary-debounce timers and releases the
    /// refresh subscription. In-flight work is not aborted; its result is
    /// discarded.
    pub fn stop(&self) {
        let mut control = self.inner.control();
        if control.lifecycle == Lifecycle::Stopped {
            return;
        }
        control.lifecycle = Lifecycle::Stopped;
        control.poll_timer.cancel();
        control.summary.debounce_mut().cancel();
        if let Some(listener) = control.refresh_listener.take() {
            listener.abort();
        }
        control.scheduler.idle();
        info!(worktree = %self.inner.identity.id, "Stopped worktree monitor");
    }

    /// Runs one timed, unforced cycle with breaker accounting, then
    /// schedules the next one.
    pub async fn poll(&self) -> Result<CycleOutcome> {
        Arc::clone(&self.inner).poll_task().await
    }

    /// Runs one update cycle without breaker accounting.
    pub async fn update(&self, force: bool) -> Result<CycleOutcome> {
        self.inner.update(force).await
    }

    /// Runs a forced cycle now.
    ///
    /// Works even while the circuit breaker is tripped; failures are
    /// returned to the caller and do not count toward the breaker.
    pub async fn refresh(&self) -> Result<CycleOutcome> {
        self.inner.update(true).await
    }

    /// Clears the circuit breaker and failure counters.
    ///
    /// If the monitor is running, polling resumes after the base interval.
    pub fn reset_circuit_breaker(&self) {
        let config = self.inner.config();
        let mut control = self.inner.control();
        let was_tripped = control.scheduler.is_tripped();
        control.scheduler.reset();
        if was_tripped {
            info!(worktree = %self.inner.identity.id, "Circuit breaker reset");
        }

        if control.lifecycle == Lifecycle::Running
            && control.scheduler.phase() != PollPhase::Polling
            && !control.poll_timer.is_armed()
        {
            self.inner.schedule_next(&mut control, &config);
        }
    }

    /// Applies an external branch/name change.
    ///
    /// Returns false (and publishes nothing) when nothing changed. When the
    /// new branch carries no recognisable issue number, the issue resolver
    /// runs in the background and publishes again only if it finds one
    /// before the branch changes.
    ///
    /// Must be called within a Tokio runtime.
    pub fn update_metadata(&self, branch: Option<String>, name: impl Into<String>) -> bool {
        if !self.inner.is_active() {
            return false;
        }
        let name = name.into();
        let main_branch = self.inner.config().main_branch;

        let committed = self.inner.commit_with(|current| {
            if current.branch == branch && current.name == name {
                return None;
            }
            let issue_number = branch
                .as_deref()
                .and_then(|b| extract_issue_number(b, &main_branch));
            Some(WorktreeState {
                branch: branch.clone(),
                name: name.clone(),
                issue_number,
                ..current.clone()
            })
        });
        let Some(snapshot) = committed else {
            return false;
        };
        info!(
            worktree = %self.inner.identity.id,
            branch = ?snapshot.branch,
            name = %snapshot.name,
            issue = ?snapshot.issue_number,
            "Worktree metadata updated"
        );

        if snapshot.issue_number.is_none() {
            if let Some(branch) = snapshot.branch.clone() {
                if branch != main_branch {
                    self.inner.spawn_issue_resolution(branch);
                }
            }
        }
        true
    }

    /// Links or unlinks a pull request. Publishes only on change.
    pub fn set_pull_request(&self, pull_request: Option<PullRequestLink>) -> bool {
        self.inner
            .commit_with(|current| {
                (current.pull_request != pull_request).then(|| WorktreeState {
                    pull_request: pull_request.clone(),
                    ..current.clone()
                })
            })
            .is_some()
    }

    /// Marks whether this is the worktree the user is working in. Publishes
    /// only on change.
    pub fn set_current(&self, is_current: bool) -> bool {
        self.inner
            .commit_with(|current| {
                (current.is_current != is_current).then(|| WorktreeState {
                    is_current,
                    ..current.clone()
                })
            })
            .is_some()
    }

    /// Starts a summary generation now, ignoring dedup.
    ///
    /// Returns `None` if the worktree is clean, has not completed a cycle
    /// yet, or the monitor is stopped.
    pub fn regenerate_summary(&self) -> Option<BeginOutcome> {
        self.inner.trigger_summary(true)
    }

    /// Replaces the runtime configuration. Takes effect from the next
    /// scheduling decision.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Config` if `config` fails validation; the
    /// previous configuration stays in force.
    pub fn update_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
        debug!(worktree = %self.inner.identity.id, "Configuration updated");
        Ok(())
    }

    /// Runs a forced cycle for every refresh request addressed to this
    /// worktree. Replaces any previous listener; released by [`stop`].
    ///
    /// [`stop`]: Self::stop
    pub fn listen_for_refresh(&self, mut requests: broadcast::Receiver<RefreshRequest>) {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.identity.id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(request) if request.targets(&id) => {
                        let Some(inner) = weak.upgrade() else { break };
                        if !inner.is_active() {
                            break;
                        }
                        debug!(worktree = %id, "Refresh requested");
                        // Separate task so releasing the listener never aborts a cycle.
                        tokio::spawn(async move {
                            if let Err(e) = inner.update(true).await {
                                warn!(worktree = %inner.identity.id, error = %e, "Refresh failed");
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(worktree = %id, skipped, "Refresh listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut control = self.inner.control();
        if control.lifecycle == Lifecycle::Stopped {
            handle.abort();
            return;
        }
        if let Some(previous) = control.refresh_listener.replace(handle) {
            previous.abort();
        }
    }
}

impl MonitorInner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Arc<WorktreeState> {
        Arc::clone(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// False once stopped. A created monitor can still run manual cycles.
    fn is_active(&self) -> bool {
        self.control().lifecycle != Lifecycle::Stopped
    }

    /// Replaces the snapshot with `f(current)` and publishes it.
    ///
    /// `f` returning `None` means nothing changed: no commit, no publish.
    /// Publishing happens under the state lock so subscribers observe
    /// snapshots in commit order.
    fn commit_with<F>(&self, f: F) -> Option<Arc<WorktreeState>>
    where
        F: FnOnce(&WorktreeState) -> Option<WorktreeState>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(&state)?);
        *state = Arc::clone(&next);
        self.collaborators
            .publisher
            .publish(TOPIC_WORKTREE_UPDATE, Arc::clone(&next));
        Some(next)
    }

    fn abandon(&self, phase: &str) -> CycleOutcome {
        debug!(worktree = %self.identity.id, phase, "Monitor stopped mid-cycle, abandoning");
        CycleOutcome::Abandoned
    }

    async fn update(self: &Arc<Self>, force: bool) -> Result<CycleOutcome> {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            debug!(worktree = %self.identity.id, "Cycle already in flight, dropping call");
            return Ok(CycleOutcome::Skipped(SkipReason::InFlight));
        };
        if !self.is_active() {
            return Ok(CycleOutcome::Skipped(SkipReason::NotRunning));
        }

        let config = self.config();
        let path = self.identity.path.as_path();

        let fetched = self.collaborators.fetcher.fetch(path, force).await;
        if !self.is_active() {
            return Ok(self.abandon("fetch"));
        }
        let change_set = match fetched {
            Ok(change_set) => change_set,
            Err(FetchError::Locked) => {
                debug!(worktree = %self.identity.id, "Index locked, skipping cycle");
                return Ok(CycleOutcome::Skipped(SkipReason::Locked));
            }
            Err(FetchError::Removed(missing)) => {
                warn!(
                    worktree = %self.identity.id,
                    path = %missing.display(),
                    "Worktree path is not accessible"
                );
                self.commit_removed();
                return Ok(CycleOutcome::Degraded);
            }
            Err(e) => {
                warn!(worktree = %self.identity.id, error = %e, "Failed to fetch change-set");
                // The next successful fetch must commit to clear the error mood.
                self.control().last_hash = None;
                self.commit_with(|current| {
                    (current.mood != Mood::Error).then(|| WorktreeState {
                        mood: Mood::Error,
                        ..current.clone()
                    })
                });
                return Err(e.into());
            }
        };

        let hash = state_hash(&change_set);
        let hash_changed = self.control().last_hash.as_deref() != Some(hash.as_str());
        if !force && !hash_changed {
            trace!(worktree = %self.identity.id, "Change-set unchanged");
            return Ok(CycleOutcome::Unchanged);
        }

        let previous = self.current();
        let transition = Transition::classify(previous.modified_count, change_set.len());

        let headline = if transition.is_clean() {
            let message = self.collaborators.fetcher.last_commit_message(path).await;
            if !self.is_active() {
                return Ok(self.abandon("commit message"));
            }
            Some(match message {
                Ok(Some(subject)) => subject,
                Ok(None) => NO_COMMITS_HEADLINE.to_string(),
                Err(e) => {
                    warn!(worktree = %self.identity.id, error = %e, "Failed to read latest commit");
                    COMMIT_UNAVAILABLE_HEADLINE.to_string()
                }
            })
        } else {
            None
        };

        let last_activity = if hash_changed && !change_set.is_empty() {
            Some(Utc::now())
        } else {
            previous.last_activity
        };

        let classified = self
            .collaborators
            .classifier
            .classify(MoodInput {
                path,
                branch: previous.branch.as_deref(),
                last_activity,
                change_set: Some(&change_set),
                main_branch: &config.main_branch,
            })
            .await;
        if !self.is_active() {
            return Ok(self.abandon("mood"));
        }
        let mood = classified.unwrap_or_else(|e| {
            warn!(worktree = %self.identity.id, error = %e, "Mood classification failed");
            Mood::Error
        });

        let note = if config.note_enabled {
            let note = self.notes.read(&config.note_filename).await;
            if !self.is_active() {
                return Ok(self.abandon("note"));
            }
            note
        } else {
            None
        };

        let available = self.collaborators.generator.availability().is_available();
        let modified_count = change_set.len();

        self.commit_with(|current| {
            let summary = headline.unwrap_or_else(|| carried_headline(current));
            let ai_status = if !available {
                AiStatus::Disabled
            } else if current.ai_status == AiStatus::Disabled {
                AiStatus::Active
            } else {
                current.ai_status
            };
            let summary_loading = available && !transition.is_clean() && current.summary_loading;
            Some(WorktreeState {
                changes: Some(change_set),
                modified_count,
                mood,
                summary,
                summary_loading,
                ai_status,
                last_activity,
                note,
                ..current.clone()
            })
        });
        debug!(
            worktree = %self.identity.id,
            ?transition,
            files = modified_count,
            ?mood,
            force,
            "Committed cycle"
        );

        {
            let mut control = self.control();
            control.last_hash = Some(hash);
            if transition.is_clean() && control.summary.reset_for_clean() {
                debug!(worktree = %self.identity.id, "Cancelled pending summary");
            }
        }
        match transition {
            Transition::BecameDirty => {
                self.trigger_summary(false);
            }
            Transition::StillDirty => self.schedule_summary(),
            Transition::BecameClean | Transition::StillClean => {}
        }

        Ok(CycleOutcome::Committed(transition))
    }

    /// Commits the error snapshot for an inaccessible worktree path.
    fn commit_removed(&self) {
        {
            let mut control = self.control();
            control.last_hash = None;
            control.summary.reset_for_clean();
        }
        self.commit_with(|current| {
            (current.mood != Mood::Error || current.summary != REMOVED_HEADLINE).then(|| {
                WorktreeState {
                    mood: Mood::Error,
                    summary: REMOVED_HEADLINE.to_string(),
                    summary_loading: false,
                    ..current.clone()
                }
            })
        });
    }

    fn poll_task(self: Arc<Self>) -> BoxFuture<'static, Result<CycleOutcome>> {
        async move { self.timed_cycle(false).await }.boxed()
    }

    /// Runs one cycle with breaker accounting and schedules the next poll.
    async fn timed_cycle(self: &Arc<Self>, force: bool) -> Result<CycleOutcome> {
        {
            let mut control = self.control();
            if control.lifecycle != Lifecycle::Running {
                return Ok(CycleOutcome::Skipped(SkipReason::NotRunning));
            }
            if control.scheduler.is_tripped() {
                return Ok(CycleOutcome::Skipped(SkipReason::BreakerTripped));
            }
            if !control.scheduler.begin_cycle() {
                debug!(worktree = %self.identity.id, "Poll already in flight, dropping call");
                return Ok(CycleOutcome::Skipped(SkipReason::InFlight));
            }
        }

        let started = Instant::now();
        let result = self.update(force).await;
        let elapsed = started.elapsed();

        let config = self.config();
        let mut control = self.control();
        if control.lifecycle != Lifecycle::Running {
            control.scheduler.idle();
            return result;
        }
        let tripped = match &result {
            Ok(CycleOutcome::Skipped(_) | CycleOutcome::Abandoned) => {
                control.scheduler.record_skip();
                false
            }
            Ok(_) => {
                control.scheduler.record_success(elapsed);
                false
            }
            Err(e) => match control.scheduler.record_failure(config.breaker_threshold) {
                FailureVerdict::Retry {
                    consecutive_failures,
                } => {
                    warn!(
                        worktree = %self.identity.id,
                        consecutive_failures,
                        error = %e,
                        "Update cycle failed"
                    );
                    false
                }
                FailureVerdict::Tripped {
                    consecutive_failures,
                } => {
                    error!(
                        worktree = %self.identity.id,
                        consecutive_failures,
                        error = %e,
                        "Circuit breaker tripped, polling stopped until reset"
                    );
                    true
                }
            },
        };
        if !tripped {
            self.schedule_next(&mut control, &config);
        }
        result
    }

    fn schedule_next(self: &Arc<Self>, control: &mut Control, config: &Config) {
        let Some(delay) = control.scheduler.wait(
            config.poll_interval,
            config.max_poll_interval,
            config.adaptive_backoff,
        ) else {
            return;
        };

        let weak = Arc::downgrade(self);
        control.poll_timer.arm(delay, move |id| async move {
            let Some(inner) = weak.upgrade() else { return };
            let claimed = inner.control().poll_timer.claim(id);
            if claimed {
                // Failures are logged and accounted inside the cycle.
                let _ = inner.poll_task().await;
            }
        });
        trace!(worktree = %self.identity.id, ?delay, "Next poll scheduled");
    }

    /// Starts a generation now unless one is running or the hash was
    /// already summarized.
    fn trigger_summary(self: &Arc<Self>, force: bool) -> Option<BeginOutcome> {
        if !self.current().is_dirty() {
            return None;
        }
        let mut control = self.control();
        if control.lifecycle == Lifecycle::Stopped {
            return None;
        }
        let hash = control.last_hash.clone()?;
        let outcome = control.summary.begin(&hash, force);
        drop(control);

        match outcome {
            BeginOutcome::Started => {
                tokio::spawn(Arc::clone(self).run_summary(hash));
            }
            BeginOutcome::Coalesced => {
                debug!(worktree = %self.identity.id, "Summary in flight, coalescing trigger");
            }
            BeginOutcome::Duplicate => {
                trace!(worktree = %self.identity.id, "Change-set already summarized");
            }
        }
        Some(outcome)
    }

    /// Starts the debounce timer, or leaves a pending one running.
    fn schedule_summary(self: &Arc<Self>) {
        let delay = self.config().summary_debounce;
        let weak = Arc::downgrade(self);

        let mut control = self.control();
        if control.lifecycle == Lifecycle::Stopped {
            return;
        }
        let armed = control
            .summary
            .debounce_mut()
            .arm_if_idle(delay, move |id| async move {
                let Some(inner) = weak.upgrade() else { return };
                let claimed = inner.control().summary.debounce_mut().claim(id);
                if claimed {
                    inner.trigger_summary(false);
                }
            });
        if armed.is_some() {
            trace!(worktree = %self.identity.id, ?delay, "Summary debounced");
        }
    }

    /// Runs a generation that already holds the in-flight slot.
    fn run_summary(self: Arc<Self>, hash: String) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut control = self.control();
                if control.lifecycle == Lifecycle::Stopped {
                    control.summary.finish();
                    debug!(worktree = %self.identity.id, "Monitor stopped, dropping summary run");
                    return;
                }
            }
            let generator = Arc::clone(&self.collaborators.generator);
            let availability = generator.availability();

            let result = if availability.is_available() {
                self.commit_with(|current| {
                    (current.ai_status != AiStatus::Loading || !current.summary_loading).then(|| {
                        WorktreeState {
                            ai_status: AiStatus::Loading,
                            summary_loading: true,
                            ..current.clone()
                        }
                    })
                });

                let snapshot = self.current();
                let config = self.config();
                let change_set = snapshot.changes.clone().unwrap_or_default();
                let request = SummaryRequest {
                    path: &self.identity.path,
                    branch: snapshot.branch.as_deref(),
                    main_branch: &config.main_branch,
                    change_set: &change_set,
                };
                Some(generator.generate(request).await)
            } else {
                None
            };

            let still_dirty = self.current().is_dirty();
            let pending = {
                let mut control = self.control();
                let pending = control.summary.finish();
                if control.lifecycle == Lifecycle::Stopped {
                    return;
                }
                if still_dirty && matches!(result, Some(Ok(SummaryOutcome::Generated { .. }))) {
                    control.summary.record_success(hash);
                }
                pending
            };

            match result {
                None => {
                    trace!(worktree = %self.identity.id, ?availability, "Summary generator unavailable");
                    self.settle_summary(AiStatus::Disabled, None);
                }
                Some(Ok(SummaryOutcome::Generated {
                    summary,
                    modified_count,
                })) => {
                    debug!(
                        worktree = %self.identity.id,
                        files = modified_count,
                        discarded = !still_dirty,
                        "Summary generated"
                    );
                    self.settle_summary(AiStatus::Active, Some(summary));
                }
                Some(Ok(SummaryOutcome::Unavailable)) => {
                    self.settle_summary(AiStatus::Disabled, None);
                }
                Some(Err(e)) => {
                    warn!(worktree = %self.identity.id, error = %e, "Summary generation failed");
                    self.settle_summary(AiStatus::Error, None);
                }
            }

            if pending && still_dirty {
                self.schedule_summary();
            }
        }
        .boxed()
    }

    /// Commits the post-generation AI status. Generated text is applied
    /// only while the worktree is still dirty.
    fn settle_summary(&self, ai_status: AiStatus, summary: Option<String>) {
        self.commit_with(|current| {
            let summary = summary
                .filter(|_| current.is_dirty())
                .unwrap_or_else(|| current.summary.clone());
            let unchanged = current.ai_status == ai_status
                && !current.summary_loading
                && current.summary == summary;
            (!unchanged).then(|| WorktreeState {
                ai_status,
                summary_loading: false,
                summary,
                ..current.clone()
            })
        });
    }

    fn spawn_issue_resolution(self: &Arc<Self>, branch: String) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let found = inner
                .collaborators
                .issue_resolver
                .resolve(&inner.identity.path, &branch)
                .await;
            let Some(number) = found else {
                trace!(worktree = %inner.identity.id, %branch, "No issue number resolved");
                return;
            };
            if !inner.is_active() {
                return;
            }
            let committed = inner.commit_with(|current| {
                let same_branch = current.branch.as_deref() == Some(branch.as_str());
                (same_branch && current.issue_number != Some(number)).then(|| WorktreeState {
                    issue_number: Some(number),
                    ..current.clone()
                })
            });
            if committed.is_some() {
                debug!(worktree = %inner.identity.id, %branch, issue = number, "Resolved issue number");
            } else {
                debug!(worktree = %inner.identity.id, %branch, "Branch changed before issue lookup finished");
            }
        });
    }
}

/// Headline kept for a dirty worktree until a summary replaces it.
fn carried_headline(current: &WorktreeState) -> String {
    if current.summary.is_empty() || current.summary == REMOVED_HEADLINE {
        DIRTY_PLACEHOLDER.to_string()
    } else {
        current.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_classification() {
        assert_eq!(Transition::classify(0, 3), Transition::BecameDirty);
        assert_eq!(Transition::classify(3, 0), Transition::BecameClean);
        assert_eq!(Transition::classify(2, 5), Transition::StillDirty);
        assert_eq!(Transition::classify(0, 0), Transition::StillClean);
        assert!(Transition::BecameClean.is_clean());
        assert!(!Transition::StillDirty.is_clean());
    }

    #[test]
    fn test_carried_headline() {
        let identity = WorktreeIdentity::new("wt", "/repo/wt");
        let mut state = WorktreeState::initial(&identity, "wt", None);
        assert_eq!(carried_headline(&state), DIRTY_PLACEHOLDER);

        state.summary = "Fix parser".to_string();
        assert_eq!(carried_headline(&state), "Fix parser");

        state.summary = REMOVED_HEADLINE.to_string();
        assert_eq!(carried_headline(&state), DIRTY_PLACEHOLDER);
    }
}
