//! Pending operation types.
//!
//! Mutations that could not reach the server are recorded as operations and
//! replayed later in the order they were recorded.

use crate::{Seq, Task, TaskDraft, TaskId, Timestamp};
use serde::{Deserialize, Serialize};

/// A mutation waiting to be sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingOperation {
    /// Create a task that so far only exists as a placeholder.
    #[serde(rename_all = "camelCase")]
    Add {
        draft: TaskDraft,
        temp_id: TaskId,
        created_at: Timestamp,
    },
    /// Write a full task to the server.
    Update { task: Task },
    /// Delete a task from the server.
    #[serde(rename_all = "camelCase")]
    Delete { task_id: TaskId },
}

impl PendingOperation {
    /// The id of the task this operation targets.
    ///
    /// For an add this is the temporary id.
    pub fn task_id(&self) -> &TaskId {
        match self {
            PendingOperation::Add { temp_id, .. } => temp_id,
            PendingOperation::Update { task } => &task.id,
            PendingOperation::Delete { task_id } => task_id,
        }
    }

    /// Short name of the operation kind, for logs and notices.
    pub fn kind(&self) -> OperationKind {
        match self {
            PendingOperation::Add { .. } => OperationKind::Add,
            PendingOperation::Update { .. } => OperationKind::Update,
            PendingOperation::Delete { .. } => OperationKind::Delete,
        }
    }

    /// Check if this is the add that produced `temp_id`.
    pub fn is_add_of(&self, id: &str) -> bool {
        matches!(self, PendingOperation::Add { temp_id, .. } if temp_id == id)
    }

    /// The local task this operation leaves behind, if any.
    ///
    /// Used to lay pending changes over freshly fetched data.
    pub fn local_task(&self) -> Option<Task> {
        match self {
            PendingOperation::Add {
                draft,
                temp_id,
                created_at,
            } => Some(Task::placeholder(temp_id.clone(), draft, *created_at)),
            PendingOperation::Update { task } => Some(task.clone()),
            PendingOperation::Delete { .. } => None,
        }
    }
}

/// Kind of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// An operation together with its queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOp {
    /// Position in recording order, unique per engine
    pub seq: Seq,
    pub operation: PendingOperation,
    /// Remote attempts that ended in a failure
    #[serde(default)]
    pub attempts: u32,
    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedOp {
    /// Create a fresh entry with no attempts.
    pub fn new(seq: Seq, operation: PendingOperation) -> Self {
        Self {
            seq,
            operation,
            attempts: 0,
            last_error: None,
        }
    }

    /// The id of the task this entry targets.
    pub fn task_id(&self) -> &TaskId {
        self.operation.task_id()
    }
}

/// How a remote call failed, as far as the retry policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// No connection; same as being offline
    NetworkUnavailable,
    /// The server refused the request (4xx)
    Rejected,
    /// The server failed or timed out (5xx)
    Unavailable,
}

impl FailureKind {
    /// Whether retrying unchanged can eventually succeed.
    pub fn is_transient(self) -> bool {
        !matches!(self, FailureKind::Rejected)
    }
}

/// An operation that exhausted its retries and waits for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOp {
    pub entry: QueuedOp,
    /// Why the last attempt failed
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(1_706_745_600, 0).unwrap()
    }

    fn sample_task(id: &str) -> Task {
        Task::placeholder(id, &TaskDraft::new("Test", "u1"), ts())
    }

    #[test]
    fn task_id_accessor() {
        let add = PendingOperation::Add {
            draft: TaskDraft::new("a", "u1"),
            temp_id: "temp-1".into(),
            created_at: ts(),
        };
        let update = PendingOperation::Update {
            task: sample_task("7"),
        };
        let delete = PendingOperation::Delete {
            task_id: "8".into(),
        };

        assert_eq!(add.task_id(), "temp-1");
        assert_eq!(update.task_id(), "7");
        assert_eq!(delete.task_id(), "8");
        assert!(add.is_add_of("temp-1"));
        assert!(!delete.is_add_of("8"));
    }

    #[test]
    fn kinds() {
        let delete = PendingOperation::Delete {
            task_id: "8".into(),
        };
        assert_eq!(delete.kind(), OperationKind::Delete);
        assert_eq!(delete.kind().to_string(), "delete");
    }

    #[test]
    fn local_task_of_add_is_placeholder() {
        let add = PendingOperation::Add {
            draft: TaskDraft::new("Paint fence", "u2"),
            temp_id: "temp-9".into(),
            created_at: ts(),
        };
        let task = add.local_task().unwrap();
        assert_eq!(task.id, "temp-9");
        assert_eq!(task.title, "Paint fence");
        assert_eq!(task.created_at, ts());

        let delete = PendingOperation::Delete {
            task_id: "1".into(),
        };
        assert!(delete.local_task().is_none());
    }

    #[test]
    fn serialization_is_tagged() {
        let op = PendingOperation::Add {
            draft: TaskDraft::new("a", "u1"),
            temp_id: "temp-1".into(),
            created_at: ts(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "add");
        assert_eq!(json["tempId"], "temp-1");
        assert_eq!(json["draft"]["userId"], "u1");

        let op = PendingOperation::Delete {
            task_id: "3".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"type":"delete","taskId":"3"}"#);
    }

    #[test]
    fn queued_op_defaults_on_old_payloads() {
        let json = r#"{"seq":4,"operation":{"type":"delete","taskId":"3"}}"#;
        let entry: QueuedOp = serde_json::from_str(json).unwrap();
        assert_eq!(entry.seq, 4);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.last_error, None);
    }

    #[test]
    fn rejected_is_not_transient() {
        assert!(FailureKind::NetworkUnavailable.is_transient());
        assert!(FailureKind::Unavailable.is_transient());
        assert!(!FailureKind::Rejected.is_transient());
    }
}
