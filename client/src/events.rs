//! Sync notices.
//!
//! Remote failures never reach callers as errors; they are reported here as
//! non-blocking notices for the UI to show.

use serde::Serialize;
use tasksync_engine::{OperationKind, Seq, TaskId};
use tokio::sync::broadcast;

/// Capacity of the notice channel; slow subscribers miss older notices.
const EVENT_CAPACITY: usize = 256;

/// Coarse state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Offline,
    Idle,
    Syncing,
}

/// A notice about sync progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The coordinator moved between offline, idle and syncing
    PhaseChanged { phase: SyncPhase },
    /// A change was stored locally and will sync later
    #[serde(rename_all = "camelCase")]
    Queued {
        seq: Seq,
        task_id: TaskId,
        kind: OperationKind,
        reason: String,
    },
    /// A change reached the server
    #[serde(rename_all = "camelCase")]
    Synced { task_id: TaskId, kind: OperationKind },
    /// The server refused a change; it will be retried a bounded number of times
    #[serde(rename_all = "camelCase")]
    Rejected {
        task_id: TaskId,
        kind: OperationKind,
        message: String,
    },
    /// A change gave up retrying and waits for acknowledgement
    #[serde(rename_all = "camelCase")]
    Parked {
        seq: Seq,
        task_id: TaskId,
        kind: OperationKind,
        reason: String,
    },
    /// Writing the snapshot failed; in-memory state is unaffected
    PersistFailed { message: String },
}

/// Broadcast channel for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Receive notices emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit a notice. Having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        tracing::debug!(?event, "Sync event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
