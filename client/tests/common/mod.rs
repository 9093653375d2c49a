//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tasksync_client::{
    CreateTaskRequest, MemoryStorage, RemoteError, RemoteTaskService, SnapshotStorage,
    StorageError, SyncCoordinator, SyncSettings,
};
use tasksync_engine::{Snapshot, Task, Timestamp, User};
use tokio::sync::Notify;

/// A request the fake server received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List { page: u32, limit: u32 },
    Create(CreateTaskRequest),
    Update(Task),
    Delete(String),
    Users,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Create(_) | Call::Update(_) | Call::Delete(_))
    }
}

#[derive(Default)]
struct ServerState {
    tasks: Vec<Task>,
    users: Vec<User>,
    next_id: u64,
    calls: Vec<Call>,
    failures: VecDeque<RemoteError>,
    gate: Option<Arc<Notify>>,
    offline: bool,
}

/// In-memory task server.
///
/// Clones share state, so a test keeps one handle while the coordinator owns
/// another.
#[derive(Clone, Default)]
pub struct FakeTaskService {
    state: Arc<Mutex<ServerState>>,
}

impl FakeTaskService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server holding `tasks`, newest first.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let service = Self::new();
        {
            let mut state = service.state.lock().unwrap();
            state.next_id = tasks.len() as u64;
            state.tasks = tasks;
        }
        service
    }

    pub fn set_users(&self, users: Vec<User>) {
        self.state.lock().unwrap().users = users;
    }

    /// Every call fails with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Make the next mutating call fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Hold the next mutating call until the returned gate is notified.
    pub fn pause_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().gate = Some(Arc::clone(&gate));
        gate
    }

    /// Add a task directly on the server side.
    pub fn insert(&self, task: Task) {
        self.state.lock().unwrap().tasks.insert(0, task);
    }

    /// Remove a task directly on the server side.
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().tasks.retain(|t| t.id != id);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    /// Wait until at least `count` mutating calls arrived.
    pub async fn wait_for_mutations(&self, count: usize) {
        for _ in 0..400 {
            if self.mutations().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} mutating calls, got {:?}", self.mutations());
    }

    fn record(&self, call: Call) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        let mutation = call.is_mutation();
        state.calls.push(call);
        if state.offline {
            return Err(RemoteError::NetworkUnavailable("connection refused".into()));
        }
        if mutation {
            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    async fn hold(&self) {
        let gate = self.state.lock().unwrap().gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

fn not_found(id: &str) -> RemoteError {
    RemoteError::Rejected {
        status: 404,
        message: format!("task {id} not found"),
    }
}

impl RemoteTaskService for FakeTaskService {
    async fn list_tasks(&self, page: u32, limit: u32) -> Result<Vec<Task>, RemoteError> {
        self.record(Call::List { page, limit })?;
        let state = self.state.lock().unwrap();
        let skip = (page.saturating_sub(1) * limit) as usize;
        Ok(state
            .tasks
            .iter()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, RemoteError> {
        self.record(Call::Create(request.clone()))?;
        self.hold().await;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let task = Task {
            id: state.next_id.to_string(),
            title: request.title.clone(),
            status: request.status,
            user_id: request.user_id.clone(),
            created_at: request.created_at,
            updated_at: None,
        };
        state.tasks.insert(0, task.clone());
        Ok(task)
    }

    async fn update_task(&self, task: &Task) -> Result<Task, RemoteError> {
        self.record(Call::Update(task.clone()))?;
        self.hold().await;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| not_found(&task.id))?;
        *stored = Task {
            updated_at: Some(ts(1_000)),
            ..task.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        self.record(Call::Delete(id.to_string()))?;
        self.hold().await;
        let mut state = self.state.lock().unwrap();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        if state.tasks.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, RemoteError> {
        self.record(Call::Users)?;
        Ok(self.state.lock().unwrap().users.clone())
    }
}

/// Storage whose writes always fail.
#[derive(Clone, Default)]
pub struct BrokenStorage;

impl SnapshotStorage for BrokenStorage {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &Snapshot) -> Result<(), StorageError> {
        Err(std::io::Error::other("disk full").into())
    }

    async fn discard(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Storage whose snapshot exists but cannot be read.
#[derive(Clone, Default)]
pub struct UnreadableStorage {
    discarded: Arc<AtomicBool>,
}

impl UnreadableStorage {
    pub fn discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl SnapshotStorage for UnreadableStorage {
    async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
    }

    async fn save(&self, _snapshot: &Snapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn discard(&self) -> Result<(), StorageError> {
        self.discarded.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub type TestCoordinator = SyncCoordinator<FakeTaskService, MemoryStorage>;

pub async fn coordinator(remote: &FakeTaskService) -> TestCoordinator {
    SyncCoordinator::new(remote.clone(), MemoryStorage::new(), SyncSettings::default()).await
}

pub fn ts(offset: i64) -> Timestamp {
    Utc.timestamp_opt(1_706_745_600 + offset, 0).unwrap()
}

pub fn task(id: &str, title: &str, status: bool, user_id: &str) -> Task {
    Task {
        id: id.into(),
        title: title.into(),
        status,
        user_id: user_id.into(),
        created_at: ts(0),
        updated_at: None,
    }
}

/// `count` server tasks with ids `count..=1`, newest first.
pub fn numbered_tasks(count: usize) -> Vec<Task> {
    (1..=count)
        .rev()
        .map(|n| task(&n.to_string(), &format!("task {n}"), false, "u1"))
        .collect()
}

pub fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
}
