//! Task filters.

use crate::{Task, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Criteria for narrowing the task list.
///
/// An empty filter matches every task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Exact status to match, `None` for any status
    pub status: Option<bool>,
    /// Owners to match, empty for any owner
    pub user_ids: BTreeSet<UserId>,
}

impl Filter {
    /// A filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: bool) -> Self {
        self.status = Some(status);
        self
    }

    /// Add an owner to the set of accepted owners.
    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_ids.insert(user_id.into());
        self
    }

    /// Check whether this filter restricts anything.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.user_ids.is_empty()
    }

    /// Check whether a task passes this filter.
    pub fn matches(&self, task: &Task) -> bool {
        let status_match = self.status.map_or(true, |status| task.status == status);
        let user_match = self.user_ids.is_empty() || self.user_ids.contains(&task.user_id);
        status_match && user_match
    }
}
