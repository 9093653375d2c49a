//! Remote task service contract.
//!
//! The coordinator talks to the server only through [`RemoteTaskService`].
//! [`HttpTaskService`] implements it over the REST endpoints; tests plug in
//! their own implementation.

mod http;

pub use http::HttpTaskService;

use serde::{Deserialize, Serialize};
use std::future::Future;
use tasksync_engine::{FailureKind, Task, TaskDraft, Timestamp, User, UserId};

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub user_id: UserId,
    pub status: bool,
    pub created_at: Timestamp,
    /// Always `null`; the server sets it on the first update
    pub updated_at: Option<Timestamp>,
}

impl CreateTaskRequest {
    /// Build the request for a draft recorded at `created_at`.
    pub fn from_draft(draft: &TaskDraft, created_at: Timestamp) -> Self {
        Self {
            title: draft.title.clone(),
            user_id: draft.user_id.clone(),
            status: draft.status,
            created_at,
            updated_at: None,
        }
    }
}

/// Remote call failures, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Map to the engine's failure classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::NetworkUnavailable(_) => FailureKind::NetworkUnavailable,
            RemoteError::Rejected { .. } => FailureKind::Rejected,
            RemoteError::Unavailable(_) => FailureKind::Unavailable,
        }
    }

    /// Check if the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Rejected { status: 404, .. })
    }
}

/// The server side of the task list.
///
/// Every method returns the server's canonical representation.
pub trait RemoteTaskService: Send + Sync + 'static {
    /// `GET /tasks?page=P&limit=L&sortBy=createdAt&order=desc`
    fn list_tasks(
        &self,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;

    /// `POST /tasks`
    fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// `PUT /tasks/{id}`
    fn update_task(&self, task: &Task) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// `DELETE /tasks/{id}`
    fn delete_task(&self, id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `GET /users?sortBy=name&order=asc`
    fn list_users(&self) -> impl Future<Output = Result<Vec<User>, RemoteError>> + Send;
}
