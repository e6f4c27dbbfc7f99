//! Single-slot, id-guarded one-shot timers.
//!
//! A [`TimerSlot`] holds at most one pending timer. Arming spawns a Tokio
//! task that sleeps for the requested delay and then runs a callback with
//! the timer's [`TimerId`]. The callback is expected to [`claim`] the slot
//! before doing any work:
//!
//! 1. If the slot still holds the same id, the claim succeeds, the slot is
//!    emptied and the callback proceeds.
//! 2. If the timer was cancelled or replaced in the meantime, the claim fails
//!    and the callback must return without side effects.
//!
//! Cancelling only ever aborts the *sleeping* task. Once a callback has
//! claimed its slot it is no longer reachable from the slot, so work it
//! started (a poll cycle, a summary generation) runs to completion.
//!
//! [`claim`]: TimerSlot::claim
//!
//! # Example
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use treeline_monitor::utils::timer::TimerSlot;
//!
//! #[tokio::main]
//! async fn main() {
//!     let slot = Arc::new(Mutex::new(TimerSlot::new()));
//!     let for_timer = Arc::clone(&slot);
//!
//!     slot.lock().unwrap().arm(Duration::from_millis(100), move |id| async move {
//!         if for_timer.lock().unwrap().claim(id) {
//!             println!("timer fired");
//!         }
//!     });
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Identifies one arming of a [`TimerSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timer that is currently sleeping.
#[derive(Debug)]
struct ArmedTimer {
    id: TimerId,
    handle: JoinHandle<()>,
}

/// Holds at most one pending one-shot timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    next_id: u64,
    armed: Option<ArmedTimer>,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a timer is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arms a new timer, cancelling any pending one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F, Fut>(&mut self, delay: Duration, fire: F) -> TimerId
    where
        F: FnOnce(TimerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let deadline = Instant::now() + delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(id).await;
        });

        trace!(timer = %id, ?delay, "Armed timer");
        self.armed = Some(ArmedTimer { id, handle });
        id
    }

    /// Arms a timer only if none is pending; a pending timer is left running.
    ///
    /// Returns the new timer's id, or `None` if one was already pending.
    pub fn arm_if_idle<F, Fut>(&mut self, delay: Duration, fire: F) -> Option<TimerId>
    where
        F: FnOnce(TimerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_armed() {
            return None;
        }
        Some(self.arm(delay, fire))
    }

    /// Claims the slot on behalf of a firing timer.
    ///
    /// Returns true (and empties the slot) only if `id` is still the pending
    /// timer.
    pub fn claim(&mut self, id: TimerId) -> bool {
        match &self.armed {
            Some(timer) if timer.id == id => {
                self.armed = None;
                true
            }
            _ => {
                trace!(timer = %id, "Ignoring stale timer");
                false
            }
        }
    }

    /// Cancels the pending timer, if any.
    ///
    /// Returns true if a timer was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.handle.abort();
                trace!(timer = %timer.id, "Cancelled timer");
                true
            }
            None => false,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    /// Arms `slot` so that a successful claim sends the timer id on `tx`.
    fn arm_reporting(
        slot: &Arc<Mutex<TimerSlot>>,
        delay_ms: u64,
        tx: mpsc::UnboundedSender<TimerId>,
    ) -> TimerId {
        let for_timer = Arc::clone(slot);
        slot.lock()
            .unwrap()
            .arm(Duration::from_millis(delay_ms), move |id| async move {
                if for_timer.lock().unwrap().claim(id) {
                    let _ = tx.send(id);
                }
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = arm_reporting(&slot, 100, tx);
        assert!(slot.lock().unwrap().is_armed());

        let fired = timeout(Duration::from_millis(200), rx.recv()).await;
        assert_eq!(fired.unwrap(), Some(id));
        assert!(!slot.lock().unwrap().is_armed(), "claim should empty the slot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_not_fired_before_delay() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        arm_reporting(&slot, 100, tx);

        let early = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(early.is_err(), "should not fire before the delay");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        arm_reporting(&slot, 100, tx);
        assert!(slot.lock().unwrap().cancel());
        assert!(!slot.lock().unwrap().cancel(), "second cancel is a no-op");

        let result = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(!matches!(result, Ok(Some(_))), "cancelled timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = arm_reporting(&slot, 100, tx.clone());
        let second = arm_reporting(&slot, 150, tx);
        assert_ne!(first, second);

        let fired = timeout(Duration::from_millis(300), rx.recv()).await;
        assert_eq!(fired.unwrap(), Some(second));

        let more = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(!matches!(more, Ok(Some(_))), "replaced timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_if_idle_leaves_pending_timer() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = arm_reporting(&slot, 100, tx.clone());
        sleep(Duration::from_millis(60)).await;

        let second = slot
            .lock()
            .unwrap()
            .arm_if_idle(Duration::from_millis(100), |_| async {});
        assert!(second.is_none(), "pending timer should be left running");

        // Fires at the original deadline, not 100ms after the second request.
        let fired = timeout(Duration::from_millis(60), rx.recv()).await;
        assert_eq!(fired.unwrap(), Some(first));
        drop(tx);
    }

    #[tokio::test]
    async fn test_stale_claim_is_rejected() {
        let mut slot = TimerSlot::new();
        let old = slot.arm(Duration::from_secs(60), |_| async {});
        let new = slot.arm(Duration::from_secs(60), |_| async {});

        assert!(!slot.claim(old));
        assert!(slot.is_armed());
        assert!(slot.claim(new));
        assert!(!slot.is_armed());
    }

    #[test]
    fn test_timer_id_display() {
        assert_eq!(TimerId(7).to_string(), "7");
    }
}
