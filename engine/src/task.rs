//! Task and user records.

use crate::{TaskId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Prefix that marks a locally generated, not yet synced task id.
///
/// Server ids never start with this prefix.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Build a temporary id from a locally unique suffix.
pub fn temporary_id(suffix: impl Display) -> TaskId {
    format!("{TEMP_ID_PREFIX}{suffix}")
}

/// Check whether an id is a temporary (placeholder) id.
pub fn is_temporary(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// A task record, either canonical (server-assigned id) or a local placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Temporary or canonical identifier
    pub id: TaskId,
    pub title: String,
    /// Completion flag
    pub status: bool,
    /// Owner of the task
    pub user_id: UserId,
    pub created_at: Timestamp,
    /// Set by the server on update; `None` for never-updated tasks
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Task {
    /// Create a local placeholder for a draft that has not reached the server.
    pub fn placeholder(temp_id: impl Into<TaskId>, draft: &TaskDraft, now: Timestamp) -> Self {
        Self {
            id: temp_id.into(),
            title: draft.title.clone(),
            status: draft.status,
            user_id: draft.user_id.clone(),
            created_at: now,
            updated_at: Some(now),
        }
    }

    /// Check if this task only exists locally.
    pub fn is_temporary(&self) -> bool {
        is_temporary(&self.id)
    }

    /// The user-editable part of this task.
    pub fn draft(&self) -> TaskDraft {
        TaskDraft {
            title: self.title.clone(),
            status: self.status,
            user_id: self.user_id.clone(),
        }
    }

    /// Compare the user-editable fields, ignoring id and timestamps.
    pub fn same_content(&self, other: &Task) -> bool {
        self.title == other.title && self.status == other.status && self.user_id == other.user_id
    }
}

/// The fields a user supplies when creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    pub status: bool,
    pub user_id: UserId,
}

impl TaskDraft {
    /// Create a draft for a new, not yet completed task.
    pub fn new(title: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        Self {
            title: title.into(),
            status: false,
            user_id: user_id.into(),
        }
    }
}

/// Read-only reference data about a task owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: String,
}
