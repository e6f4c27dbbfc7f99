//! Snapshot publishing and refresh requests.
//!
//! Monitors never talk to a global bus. Each one is handed a [`Publisher`]
//! and emits exactly one snapshot per committed state through it. Tests
//! inject a recording publisher; the binary uses [`BroadcastPublisher`],
//! which fans snapshots out over a tokio broadcast channel.
//!
//! The same bus carries [`RefreshRequest`]s in the other direction, so a
//! front end can ask one worktree (or all of them) to re-poll immediately.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use treeline_monitor::bus::{BroadcastPublisher, Publisher, TOPIC_WORKTREE_UPDATE};
//! use treeline_monitor::types::{WorktreeIdentity, WorktreeState};
//!
//! let bus = BroadcastPublisher::new();
//! let mut rx = bus.subscribe();
//!
//! let identity = WorktreeIdentity::new("wt-1", "/repo/wt-1");
//! let state = Arc::new(WorktreeState::initial(&identity, "wt-1", None));
//! bus.publish(TOPIC_WORKTREE_UPDATE, state);
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.snapshot.id, "wt-1");
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::types::WorktreeState;

/// Topic for full worktree snapshots.
pub const TOPIC_WORKTREE_UPDATE: &str = "worktree:update";

/// Default channel capacity.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sink for committed snapshots.
///
/// Publishing is fire-and-forget and must not block.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, snapshot: Arc<WorktreeState>);
}

/// One published snapshot.
#[derive(Debug, Clone)]
pub struct WorktreeEvent {
    pub topic: String,
    pub snapshot: Arc<WorktreeState>,
}

/// Asks monitors to run a forced cycle now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshRequest {
    /// Target worktree, or `None` for every monitor.
    pub worktree_id: Option<String>,
}

impl RefreshRequest {
    /// A request addressed to every monitor.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A request addressed to one worktree.
    #[must_use]
    pub fn for_worktree(id: impl Into<String>) -> Self {
        Self {
            worktree_id: Some(id.into()),
        }
    }

    /// Returns true if the monitor for `id` should act on this request.
    #[must_use]
    pub fn targets(&self, id: &str) -> bool {
        self.worktree_id.as_deref().map_or(true, |target| target == id)
    }
}

/// Broadcast-channel bus for snapshots and refresh requests.
///
/// Cheap to clone; all clones share the same channels.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    events: Sender<WorktreeEvent>,
    refresh: Sender<RefreshRequest>,
}

impl BroadcastPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus whose channels hold `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (refresh, _) = broadcast::channel(capacity);
        debug!(capacity, "Created worktree event bus");
        Self { events, refresh }
    }

    /// Receives every snapshot published after this call.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<WorktreeEvent> {
        self.events.subscribe()
    }

    /// Receives every refresh request sent after this call.
    #[must_use]
    pub fn subscribe_refresh(&self) -> Receiver<RefreshRequest> {
        self.refresh.subscribe()
    }

    /// Sends a refresh request; returns how many listeners received it.
    pub fn request_refresh(&self, request: RefreshRequest) -> usize {
        trace!(worktree = ?request.worktree_id, "Requesting refresh");
        self.refresh.send(request).unwrap_or(0)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, topic: &str, snapshot: Arc<WorktreeState>) {
        trace!(topic, worktree = %snapshot.id, "Publishing snapshot");
        let event = WorktreeEvent {
            topic: topic.to_string(),
            snapshot,
        };
        if self.events.send(event).is_err() {
            trace!(topic, "No active subscribers for snapshot");
        }
    }
}
