//! Snapshot types for persisting and restoring engine state.
//!
//! A snapshot holds the task list, the user list and the pending queue
//! (including its failed entries). It is rewritten after every mutating
//! operation and read once at start-up.

use crate::{error::Result, Error, FailedOp, PendingQueue, QueuedOp, Seq, Task, TaskStore, User};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Fixed namespace the snapshot is stored under.
pub const STORAGE_NAMESPACE: &str = "tasks-storage";

/// A point-in-time copy of everything that must survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Tasks, newest first
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub users: Vec<User>,
    /// Operations not yet acknowledged by the server, in `seq` order
    pub pending_ops: Vec<QueuedOp>,
    /// Operations waiting for user acknowledgement
    #[serde(default)]
    pub failed_ops: Vec<FailedOp>,
    /// Next sequence number to hand out
    #[serde(default)]
    pub next_seq: Seq,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tasks: Vec::new(),
            users: Vec::new(),
            pending_ops: Vec::new(),
            failed_ops: Vec::new(),
            next_seq: 0,
        }
    }
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a store and queue.
    ///
    /// `in_replay` are entries drained from the queue that have not been
    /// resolved yet; they are persisted alongside the queue.
    pub fn capture<'a>(
        store: &TaskStore,
        queue: &PendingQueue,
        in_replay: impl IntoIterator<Item = &'a QueuedOp>,
    ) -> Self {
        let mut pending_ops: Vec<QueuedOp> = queue.iter().cloned().collect();
        pending_ops.extend(in_replay.into_iter().cloned());
        pending_ops.sort_by_key(|e| e.seq);
        pending_ops.dedup_by_key(|e| e.seq);

        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            tasks: store.tasks().to_vec(),
            users: store.users().to_vec(),
            pending_ops,
            failed_ops: queue.failed().to_vec(),
            next_seq: queue.next_seq(),
        }
    }

    /// Rebuild the store and queue from this snapshot.
    pub fn restore(self, limit: u32) -> (TaskStore, PendingQueue) {
        let store = TaskStore::from_parts(self.tasks, self.users, limit);
        let queue = PendingQueue::from_parts(self.pending_ops, self.failed_ops, self.next_seq);
        (store, queue)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::UnsupportedSnapshotVersion {
                found: snapshot.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PendingOperation, TaskDraft, Timestamp};
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(1_706_745_600, 0).unwrap()
    }

    fn task(id: &str) -> Task {
        Task::placeholder(id, &TaskDraft::new(format!("task {id}"), "u1"), ts())
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = Snapshot::new();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.pending_ops.is_empty());
    }

    #[test]
    fn capture_and_restore() {
        let mut store = TaskStore::new(10);
        store.replace_page(vec![task("1"), task("2")]);
        store.set_users(vec![User {
            id: "u1".into(),
            name: "Ada".into(),
            avatar: "https://example.com/ada.png".into(),
        }]);

        let mut queue = PendingQueue::new();
        queue.enqueue(PendingOperation::Delete {
            task_id: "3".into(),
        });
        let drained = queue.drain();
        queue.enqueue(PendingOperation::Update { task: task("1") });

        let snapshot = Snapshot::capture(&store, &queue, drained.iter());
        assert_eq!(snapshot.pending_ops.len(), 2);
        assert_eq!(snapshot.pending_ops[0].seq, 0);
        assert_eq!(snapshot.next_seq, 2);

        let json = snapshot.to_json().unwrap();
        let (restored_store, mut restored_queue) = Snapshot::from_json(&json).unwrap().restore(10);

        assert_eq!(restored_store.tasks(), store.tasks());
        assert_eq!(restored_store.users().len(), 1);
        assert_eq!(restored_queue.len(), 2);
        assert_eq!(
            restored_queue.enqueue(PendingOperation::Delete {
                task_id: "4".into()
            }),
            2
        );
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "tasks": [],
            "pendingOps": []
        }"#;

        let result = Snapshot::from_json(json);
        assert!(matches!(
            result,
            Err(Error::UnsupportedSnapshotVersion { found: 999, .. })
        ));
    }

    #[test]
    fn reject_garbage() {
        let result = Snapshot::from_json("{\"tasks\": [");
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn optional_sections_default() {
        let json = r#"{"formatVersion": 1, "tasks": [], "pendingOps": []}"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        assert!(snapshot.users.is_empty());
        assert!(snapshot.failed_ops.is_empty());
        assert_eq!(snapshot.next_seq, 0);
    }

    #[test]
    fn deterministic_serialization() {
        let mut store = TaskStore::new(10);
        store.replace_page(vec![task("a"), task("b")]);
        let queue = PendingQueue::new();

        let first = Snapshot::capture(&store, &queue, std::iter::empty())
            .to_json()
            .unwrap();
        let second = Snapshot::capture(&store, &queue, std::iter::empty())
            .to_json()
            .unwrap();
        assert_eq!(first, second);
    }
}
