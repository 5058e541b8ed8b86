// events.rs: Events the sync engine publishes.
//
// The engine owns a broadcast channel. Observers call `subscribe()` and
// re-read the cache (via `stale_snapshot()`) when they hear `GoalsUpdated`;
// events carry no goal data. Dropping the receiver unsubscribes. A slow
// observer that falls behind gets `Lagged` and should simply re-read.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// One or more goals changed after a fetch or refresh.
    GoalsUpdated,

    /// The queued-goal reconciliation loop started.
    ReconciliationStarted,

    /// The reconciliation loop ended, either drained or stopped by `error`.
    ReconciliationFinished { rounds: u32, error: Option<String> },

    /// The cache was reset because the user signed out.
    SignedOut,
}

impl SyncEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::GoalsUpdated => "goals_updated",
            SyncEvent::ReconciliationStarted => "reconciliation_started",
            SyncEvent::ReconciliationFinished { .. } => "reconciliation_finished",
            SyncEvent::SignedOut => "signed_out",
        }
    }
}

/// Broadcast channel for [`SyncEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no subscribers for sync event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
