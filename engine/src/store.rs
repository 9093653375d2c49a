//! Store - the in-memory task list the UI renders from.
//!
//! The store keeps tasks newest first, at most one per id, together with the
//! user reference list, the active filter and the pagination cursor.

use crate::{Filter, Task, TaskId, User};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default number of tasks requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Pagination cursor over the remote task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Next page to request (1-based)
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Whether the server may hold more tasks past the current page
    pub has_more: bool,
}

impl Pagination {
    /// A cursor positioned before the first page.
    pub fn new(limit: u32) -> Self {
        Self {
            page: 1,
            limit: limit.max(1),
            has_more: true,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_LIMIT)
    }
}

/// What merging a fetched page changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMerge {
    /// Records returned by the server
    pub received: usize,
    /// Records that were new to the store
    pub added: usize,
    /// Records dropped because their id was already present
    pub duplicates: usize,
}

/// The local task store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStore {
    tasks: Vec<Task>,
    users: Vec<User>,
    #[serde(skip)]
    filter: Filter,
    #[serde(skip)]
    pagination: Pagination,
}

impl TaskStore {
    /// Create an empty store with the given page size.
    pub fn new(limit: u32) -> Self {
        Self {
            tasks: Vec::new(),
            users: Vec::new(),
            filter: Filter::default(),
            pagination: Pagination::new(limit),
        }
    }

    /// Rebuild a store from persisted tasks and users.
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn from_parts(tasks: Vec<Task>, users: Vec<User>, limit: u32) -> Self {
        let mut store = Self::new(limit);
        store.users = users;
        store.extend_unique(tasks);
        store
    }

    /// All tasks, newest first.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Check if a task id is present.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Number of tasks held.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the store holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The user reference list.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Replace the user reference list.
    pub fn set_users(&mut self, users: Vec<User>) {
        self.users = users;
    }

    /// The active filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Replace the active filter.
    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    /// The pagination cursor.
    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Change the page size. The cursor restarts at the first page.
    pub fn set_limit(&mut self, limit: u32) {
        self.pagination = Pagination::new(limit);
    }

    /// Reset the list to the first page of results.
    ///
    /// The cursor moves to page 2; `has_more` is set when the server returned a
    /// full page.
    pub fn replace_page(&mut self, tasks: Vec<Task>) -> PageMerge {
        let received = tasks.len();
        self.tasks.clear();
        let added = self.extend_unique(tasks);

        self.pagination.page = 2;
        self.pagination.has_more = received >= self.pagination.limit as usize;

        PageMerge {
            received,
            added,
            duplicates: received - added,
        }
    }

    /// Merge a subsequent page, dropping records whose id is already held.
    ///
    /// `has_more` follows the raw page length returned by the server, so a full
    /// page of duplicates still advances the cursor instead of stalling it.
    pub fn append_page(&mut self, tasks: Vec<Task>) -> PageMerge {
        let received = tasks.len();
        let added = self.extend_unique(tasks);

        self.pagination.page += 1;
        self.pagination.has_more = received >= self.pagination.limit as usize;

        PageMerge {
            received,
            added,
            duplicates: received - added,
        }
    }

    /// Insert or replace a task by id. New tasks go to the front.
    pub fn upsert(&mut self, task: Task) {
        match self.position(&task.id) {
            Some(index) => self.tasks[index] = task,
            None => self.tasks.insert(0, task),
        }
    }

    /// Replace a task only if its id is already present.
    pub fn replace_existing(&mut self, task: Task) -> bool {
        match self.position(&task.id) {
            Some(index) => {
                self.tasks[index] = task;
                true
            }
            None => false,
        }
    }

    /// Replace the task stored under `old_id` with `task`, keeping its position.
    ///
    /// Used to swap a placeholder for its canonical record. Any other copy of
    /// the canonical id is dropped so the id stays unique.
    pub fn replace_id(&mut self, old_id: &str, task: Task) -> bool {
        let Some(index) = self.position(old_id) else {
            return false;
        };

        let new_id = task.id.clone();
        self.tasks[index] = task;

        let mut position = 0;
        self.tasks.retain(|t| {
            let keep = position == index || t.id != new_id;
            position += 1;
            keep
        });
        true
    }

    /// Remove a task by id. Removing an absent id is a no-op.
    pub fn remove_by_id(&mut self, id: &str) -> Option<Task> {
        let index = self.position(id)?;
        Some(self.tasks.remove(index))
    }

    /// Tasks matching a filter, in store order.
    ///
    /// Pure: never mutates the store.
    pub fn filtered_view(&self, filter: &Filter) -> Vec<&Task> {
        self.tasks.iter().filter(|t| filter.matches(t)).collect()
    }

    /// Tasks matching the active filter.
    pub fn visible(&self) -> Vec<&Task> {
        self.filtered_view(&self.filter)
    }

    /// Ids of all held tasks.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|t| &t.id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn extend_unique(&mut self, tasks: Vec<Task>) -> usize {
        let mut known: HashSet<TaskId> = self.tasks.iter().map(|t| t.id.clone()).collect();
        let before = self.tasks.len();
        for task in tasks {
            if known.insert(task.id.clone()) {
                self.tasks.push(task);
            }
        }
        self.tasks.len() - before
    }
}
