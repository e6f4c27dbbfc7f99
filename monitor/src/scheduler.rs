//! Adaptive poll scheduling and circuit breaking.
//!
//! [`PollScheduler`] is a small state machine over [`PollPhase`]:
//!
//! ```text
//!            begin_cycle            record_success / record_failure (below threshold)
//!   Idle ─────────────────▶ Polling ─────────────────────────────────────────▶ Waiting
//!    ▲                         │  ▲                                               │
//!    │                         │  └──────────────── begin_cycle ──────────────────┘
//!    │ reset                   │ record_failure (threshold reached)
//!    └──────────────────── Tripped
//! ```
//!
//! Only one cycle can be `Polling` at a time, and `Tripped` is left only
//! through an explicit [`PollScheduler::reset`].

use std::time::Duration;

/// Multiplier applied to the last cycle's duration under adaptive backoff.
const BACKOFF_FACTOR: f64 = 1.5;

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    /// Not scheduled (not started yet, or stopped).
    #[default]
    Idle,
    /// A cycle is running.
    Polling,
    /// Sleeping until the next cycle.
    Waiting { delay: Duration },
    /// Too many consecutive failures; needs an explicit reset.
    Tripped,
}

/// Result of recording a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Keep polling.
    Retry { consecutive_failures: u32 },
    /// The breaker tripped; polling stops.
    Tripped { consecutive_failures: u32 },
}

/// Computes the delay before the next poll.
///
/// With adaptive backoff the delay is `min(max(base, 1.5 × last), max)`,
/// otherwise it is always `base`.
#[must_use]
pub fn next_poll_delay(
    base: Duration,
    max: Duration,
    last_duration: Option<Duration>,
    adaptive: bool,
) -> Duration {
    if !adaptive {
        return base;
    }
    let scaled = last_duration
        .map(|d| d.mul_f64(BACKOFF_FACTOR))
        .unwrap_or(Duration::ZERO);
    base.max(scaled).min(max)
}

/// Poll phase plus the ephemeral backoff and breaker counters.
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    phase: PollPhase,
    last_duration: Option<Duration>,
    consecutive_failures: u32,
}

impl PollScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.phase == PollPhase::Tripped
    }

    #[must_use]
    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Enters `Polling`. Returns false if the breaker is tripped or a cycle
    /// is already running.
    pub fn begin_cycle(&mut self) -> bool {
        match self.phase {
            PollPhase::Tripped | PollPhase::Polling => false,
            PollPhase::Idle | PollPhase::Waiting { .. } => {
                self.phase = PollPhase::Polling;
                true
            }
        }
    }

    /// Records a successful cycle and how long it took.
    pub fn record_success(&mut self, elapsed: Duration) {
        self.consecutive_failures = 0;
        self.last_duration = Some(elapsed);
        if self.phase == PollPhase::Polling {
            self.phase = PollPhase::Idle;
        }
    }

    /// Records a cycle that ended without measuring its duration, such as a
    /// dropped re-entrant call.
    pub fn record_skip(&mut self) {
        if self.phase == PollPhase::Polling {
            self.phase = PollPhase::Idle;
        }
    }

    /// Records a failed cycle, tripping the breaker at `threshold`.
    pub fn record_failure(&mut self, threshold: u32) -> FailureVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= threshold.max(1) {
            self.phase = PollPhase::Tripped;
            FailureVerdict::Tripped {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            if self.phase == PollPhase::Polling {
                self.phase = PollPhase::Idle;
            }
            FailureVerdict::Retry {
                consecutive_failures: self.consecutive_failures,
            }
        }
    }

    /// Computes the next delay and enters `Waiting`.
    ///
    /// Returns `None` without changing phase if the breaker is tripped.
    pub fn wait(&mut self, base: Duration, max: Duration, adaptive: bool) -> Option<Duration> {
        if self.is_tripped() {
            return None;
        }
        let delay = next_poll_delay(base, max, self.last_duration, adaptive);
        self.phase = PollPhase::Waiting { delay };
        Some(delay)
    }

    /// Clears the breaker and all counters.
    ///
    /// An in-flight cycle keeps its `Polling` phase; any other phase returns
    /// to `Idle`.
    pub fn reset(&mut self) {
        if self.phase != PollPhase::Polling {
            self.phase = PollPhase::Idle;
        }
        self.last_duration = None;
        self.consecutive_failures = 0;
    }

    /// Returns to `Idle` without touching the counters.
    pub fn idle(&mut self) {
        if self.phase != PollPhase::Tripped {
            self.phase = PollPhase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(2000);
    const MAX: Duration = Duration::from_millis(30000);

    #[test]
    fn delay_scales_with_last_duration() {
        let delay = next_poll_delay(BASE, MAX, Some(Duration::from_millis(4000)), true);
        assert_eq!(delay, Duration::from_millis(6000));
    }

    #[test]
    fn delay_never_below_base() {
        let delay = next_poll_delay(BASE, MAX, Some(Duration::from_millis(100)), true);
        assert_eq!(delay, BASE);
        assert_eq!(next_poll_delay(BASE, MAX, None, true), BASE);
    }

    #[test]
    fn delay_capped_at_max() {
        let delay = next_poll_delay(BASE, MAX, Some(Duration::from_secs(60)), true);
        assert_eq!(delay, MAX);
    }

    #[test]
    fn delay_is_base_without_adaptive_backoff() {
        let delay = next_poll_delay(BASE, MAX, Some(Duration::from_secs(60)), false);
        assert_eq!(delay, BASE);
    }

    #[test]
    fn begin_cycle_refuses_reentry() {
        let mut scheduler = PollScheduler::new();
        assert!(scheduler.begin_cycle());
        assert_eq!(scheduler.phase(), PollPhase::Polling);
        assert!(!scheduler.begin_cycle());
    }

    #[test]
    fn success_resets_failures_and_records_duration() {
        let mut scheduler = PollScheduler::new();
        scheduler.begin_cycle();
        scheduler.record_failure(3);
        scheduler.begin_cycle();
        scheduler.record_success(Duration::from_millis(4000));

        assert_eq!(scheduler.consecutive_failures(), 0);
        assert_eq!(scheduler.last_duration(), Some(Duration::from_millis(4000)));
        assert_eq!(
            scheduler.wait(BASE, MAX, true),
            Some(Duration::from_millis(6000))
        );
        assert_eq!(
            scheduler.phase(),
            PollPhase::Waiting {
                delay: Duration::from_millis(6000)
            }
        );
    }

    #[test]
    fn breaker_trips_at_threshold() {
        let mut scheduler = PollScheduler::new();
        for attempt in 1..3 {
            scheduler.begin_cycle();
            assert_eq!(
                scheduler.record_failure(3),
                FailureVerdict::Retry {
                    consecutive_failures: attempt
                }
            );
            assert!(!scheduler.is_tripped());
        }

        scheduler.begin_cycle();
        assert_eq!(
            scheduler.record_failure(3),
            FailureVerdict::Tripped {
                consecutive_failures: 3
            }
        );
        assert!(scheduler.is_tripped());
        assert!(!scheduler.begin_cycle(), "tripped breaker blocks cycles");
        assert_eq!(scheduler.wait(BASE, MAX, true), None);
    }

    #[test]
    fn tripped_breaker_only_clears_on_reset() {
        let mut scheduler = PollScheduler::new();
        scheduler.begin_cycle();
        scheduler.record_failure(1);
        assert!(scheduler.is_tripped());

        scheduler.record_success(Duration::from_millis(10));
        scheduler.idle();
        assert!(scheduler.is_tripped());

        scheduler.reset();
        assert!(!scheduler.is_tripped());
        assert_eq!(scheduler.consecutive_failures(), 0);
        assert_eq!(scheduler.last_duration(), None);
        assert_eq!(scheduler.wait(BASE, MAX, true), Some(BASE));
    }

    #[test]
    fn reset_during_cycle_keeps_polling() {
        let mut scheduler = PollScheduler::new();
        scheduler.begin_cycle();
        scheduler.reset();
        assert_eq!(scheduler.phase(), PollPhase::Polling);
        assert!(!scheduler.begin_cycle());
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let mut scheduler = PollScheduler::new();
        scheduler.begin_cycle();
        assert!(matches!(
            scheduler.record_failure(0),
            FailureVerdict::Tripped { .. }
        ));
    }

    #[test]
    fn skip_leaves_counters_alone() {
        let mut scheduler = PollScheduler::new();
        scheduler.begin_cycle();
        scheduler.record_success(Duration::from_millis(500));
        scheduler.begin_cycle();
        scheduler.record_skip();
        assert_eq!(scheduler.phase(), PollPhase::Idle);
        assert_eq!(scheduler.last_duration(), Some(Duration::from_millis(500)));
    }
}
