//! Sync coordinator.
//!
//! Ties the local store, the pending queue and the remote service together.
//! Every user action is applied locally first, then either sent right away or
//! queued; queued operations are replayed in `seq` order once connectivity
//! comes back. Remote failures never surface as errors: they are reported as
//! [`SyncEvent`]s while local state stays as the user left it.
//!
//! All state lives behind one lock. A public operation holds it only for the
//! synchronous part of its work, never across a remote call, and every
//! committed change is written to [`SnapshotStorage`] before the operation
//! returns.

use crate::config::SyncSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ClientError, Result, StorageError};
use crate::events::{EventBus, SyncEvent, SyncPhase};
use crate::remote::{CreateTaskRequest, RemoteError, RemoteTaskService};
use crate::storage::SnapshotStorage;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tasksync_engine::{
    amend_add, is_temporary, overlay, temporary_id, Disposition, FailedOp, FailureKind, Filter,
    OperationKind, PageMerge, PendingOperation, PendingQueue, QueuedOp, ReplayBatch, Seq,
    Snapshot, Task, TaskDraft, TaskId, TaskStore, User,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What a mutation did with its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server acknowledged it
    Synced,
    /// Stored for a later replay
    Queued { seq: Seq },
    /// The server refused it. It stays queued until it runs out of attempts,
    /// then it is parked.
    Rejected { seq: Seq, message: String },
    /// Nothing had to reach the server
    LocalOnly,
}

/// Result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Id the task is stored under afterwards; canonical once an add synced
    pub task_id: TaskId,
    pub outcome: MutationOutcome,
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T = PageMerge> {
    Loaded(T),
    /// Another fetch is running, or there is nothing more to load
    Skipped,
    Offline,
    /// The request failed; local content was kept
    Failed(RemoteError),
}

/// Totals of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub synced: usize,
    pub deferred: usize,
    pub parked: usize,
}

/// Observable sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    pub online: bool,
    pub phase: SyncPhase,
    /// Next page to request
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
    pub loading: bool,
    /// Operations not yet acknowledged, queued or in flight
    pub pending: usize,
    /// Operations waiting for acknowledgement
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Immediate,
    Replay,
}

/// What to do with an operation once it is applied locally.
#[derive(Debug)]
enum Dispatch {
    Local,
    Queued { seq: Seq, kind: OperationKind },
    /// Queued behind an earlier operation on the same task
    Waiting { seq: Seq, kind: OperationKind },
    Send(QueuedOp),
}

#[derive(Debug, Default)]
struct Delivered {
    canonical_id: Option<TaskId>,
    follow_up: Option<PendingOperation>,
}

/// A create the server has not answered yet.
#[derive(Debug, Clone)]
struct PendingCreate {
    /// Latest local content of the placeholder
    placeholder: Task,
    /// Deleted locally while the create was in flight
    deleted: bool,
}

#[derive(Debug)]
struct EngineState {
    store: TaskStore,
    queue: PendingQueue,
    replay: Option<ReplayBatch>,
    /// Operations sent directly, keyed by seq
    in_flight: BTreeMap<Seq, QueuedOp>,
    /// Creates in flight, keyed by temporary id
    creates: HashMap<TaskId, PendingCreate>,
    online: bool,
    loading: bool,
    generation: u64,
}

impl EngineState {
    fn new(store: TaskStore, queue: PendingQueue) -> Self {
        Self {
            store,
            queue,
            replay: None,
            in_flight: BTreeMap::new(),
            creates: HashMap::new(),
            online: true,
            loading: false,
            generation: 0,
        }
    }

    fn phase(&self) -> SyncPhase {
        if !self.online {
            SyncPhase::Offline
        } else if self.replay.is_some() {
            SyncPhase::Syncing
        } else {
            SyncPhase::Idle
        }
    }

    /// Every unacknowledged entry, in `seq` order.
    fn pending(&self) -> Vec<&QueuedOp> {
        let mut entries: Vec<&QueuedOp> = self
            .queue
            .iter()
            .chain(self.in_flight.values())
            .collect();
        if let Some(batch) = &self.replay {
            entries.extend(batch.pending());
        }
        entries.sort_by_key(|e| e.seq);
        entries
    }

    fn snapshot(&self) -> Snapshot {
        let mut outstanding: Vec<&QueuedOp> = self.in_flight.values().collect();
        if let Some(batch) = &self.replay {
            outstanding.extend(batch.pending());
        }
        Snapshot::capture(&self.store, &self.queue, outstanding)
    }

    /// Check whether an earlier operation on `task_id` is still unacknowledged.
    ///
    /// Parked operations do not count.
    fn is_busy(&self, task_id: &str) -> bool {
        self.in_flight.values().any(|e| e.task_id() == task_id)
            || self.queue.iter().any(|e| e.task_id() == task_id)
            || self
                .replay
                .as_ref()
                .is_some_and(|batch| batch.pending().iter().any(|e| e.task_id() == task_id))
    }

    /// Queue the operation, or claim a seq for sending it right away.
    ///
    /// An operation on a task that still has one outstanding is queued behind
    /// it, so one task's operations reach the server in recording order.
    fn register(&mut self, operation: PendingOperation) -> Dispatch {
        let kind = operation.kind();
        if !self.online {
            let seq = self.queue.enqueue(operation);
            return Dispatch::Queued { seq, kind };
        }
        if self.is_busy(operation.task_id()) {
            let seq = self.queue.enqueue(operation);
            return Dispatch::Waiting { seq, kind };
        }
        let entry = QueuedOp::new(self.queue.allocate_seq(), operation);
        self.begin_create(&entry.operation);
        self.in_flight.insert(entry.seq, entry.clone());
        Dispatch::Send(entry)
    }

    fn begin_create(&mut self, operation: &PendingOperation) {
        if let PendingOperation::Add { temp_id, .. } = operation {
            let placeholder = self
                .store
                .get(temp_id)
                .cloned()
                .or_else(|| operation.local_task());
            if let Some(placeholder) = placeholder {
                self.creates.insert(
                    temp_id.clone(),
                    PendingCreate {
                        placeholder,
                        deleted: false,
                    },
                );
            }
        }
    }

    fn resolve(&mut self, seq: Seq, origin: Origin) {
        match origin {
            Origin::Immediate => {
                self.in_flight.remove(&seq);
            }
            Origin::Replay => {
                if let Some(batch) = self.replay.as_mut() {
                    batch.complete(seq);
                }
            }
        }
    }

    /// Swap the placeholder for the created task.
    ///
    /// Returns the operation still owed to the server when the placeholder
    /// changed or was deleted while the create was in flight.
    fn finish_create(&mut self, temp_id: &str, created: Task) -> Option<PendingOperation> {
        let (deleted, local) = match self.creates.remove(temp_id) {
            Some(create) => (create.deleted, Some(create.placeholder)),
            None => (false, self.store.get(temp_id).cloned()),
        };

        if deleted {
            self.store.remove_by_id(temp_id);
            return Some(PendingOperation::Delete {
                task_id: created.id,
            });
        }

        let mut task = created;
        let follow_up = match local {
            Some(local) if !local.same_content(&task) => {
                task.title = local.title;
                task.status = local.status;
                task.user_id = local.user_id;
                Some(PendingOperation::Update { task: task.clone() })
            }
            _ => None,
        };
        if !self.store.replace_id(temp_id, task.clone()) {
            self.store.upsert(task);
        }
        follow_up
    }

    /// Apply the server's copy unless the task changed locally meanwhile.
    fn finish_update(&mut self, sent: &Task, saved: Task) -> bool {
        let unchanged = self
            .store
            .get(&sent.id)
            .is_some_and(|current| current.same_content(sent));
        if unchanged {
            self.store.replace_existing(saved);
        }
        unchanged
    }

    /// Carry a placeholder edit into whichever add will create it.
    fn amend_placeholder(&mut self, task: &Task) {
        let draft = task.draft();
        if let Some(create) = self.creates.get_mut(&task.id) {
            create.placeholder = task.clone();
        }
        self.queue.amend_pending_add(&task.id, draft.clone());
        if let Some(batch) = self.replay.as_mut() {
            batch.amend_pending_add(&task.id, draft.clone());
        }
        amend_add(self.in_flight.values_mut(), &task.id, draft);
    }

    /// Forget an add that was never confirmed.
    fn cancel_add(&mut self, temp_id: &str) {
        if let Some(create) = self.creates.get_mut(temp_id) {
            create.deleted = true;
        }
        self.queue.cancel_pending_add(temp_id);
        if let Some(batch) = self.replay.as_mut() {
            batch.cancel_pending_add(temp_id);
        }
        self.in_flight.retain(|_, entry| entry.task_id() != temp_id);
    }

    /// Re-apply local effects after server data replaced the store.
    fn overlay_pending(&mut self) {
        let entries: Vec<QueuedOp> = self.pending().into_iter().cloned().collect();
        overlay(&mut self.store, &entries);

        for (temp_id, create) in &self.creates {
            if create.deleted {
                self.store.remove_by_id(temp_id);
            } else if !self.store.contains(temp_id) {
                self.store.upsert(create.placeholder.clone());
            }
        }
    }

    fn settle_failure(
        &mut self,
        sent: &QueuedOp,
        error: &RemoteError,
        max_attempts: u32,
        events: &EventBus,
    ) -> MutationOutcome {
        let create = match &sent.operation {
            PendingOperation::Add { temp_id, .. } => self.creates.remove(temp_id),
            _ => None,
        };
        let Some(mut entry) = self.in_flight.remove(&sent.seq) else {
            return MutationOutcome::LocalOnly;
        };
        if create.is_some_and(|c| c.deleted) {
            return MutationOutcome::LocalOnly;
        }

        let message = error.to_string();
        entry.attempts += 1;
        entry.last_error = Some(message.clone());
        let seq = entry.seq;
        let task_id = entry.task_id().clone();
        let kind = entry.operation.kind();

        if error.kind() != FailureKind::Rejected {
            events.emit(SyncEvent::Queued {
                seq,
                task_id,
                kind,
                reason: message,
            });
            self.queue.restore([entry]);
            return MutationOutcome::Queued { seq };
        }

        events.emit(SyncEvent::Rejected {
            task_id: task_id.clone(),
            kind,
            message: message.clone(),
        });
        if entry.attempts >= max_attempts {
            events.emit(SyncEvent::Parked {
                seq,
                task_id,
                kind,
                reason: message.clone(),
            });
            self.queue.park(FailedOp {
                entry,
                reason: message.clone(),
            });
        } else {
            self.queue.restore([entry]);
        }
        MutationOutcome::Rejected { seq, message }
    }

    fn settle_replay_failure(&mut self, sent: &QueuedOp, error: &RemoteError, events: &EventBus) {
        let deleted = match &sent.operation {
            PendingOperation::Add { temp_id, .. } => {
                self.creates.remove(temp_id).is_some_and(|c| c.deleted)
            }
            _ => false,
        };
        let Some(batch) = self.replay.as_mut() else {
            return;
        };
        if deleted {
            batch.discard(sent.seq);
            return;
        }

        let message = error.to_string();
        let task_id = sent.task_id().clone();
        let kind = sent.operation.kind();
        if error.kind() == FailureKind::Rejected {
            events.emit(SyncEvent::Rejected {
                task_id: task_id.clone(),
                kind,
                message: message.clone(),
            });
        }
        if batch.fail(sent.seq, error.kind(), message.clone()) == Some(Disposition::Parked) {
            events.emit(SyncEvent::Parked {
                seq: sent.seq,
                task_id,
                kind,
                reason: message,
            });
        }
    }
}

struct Inner<R, S> {
    remote: R,
    storage: S,
    settings: SyncSettings,
    events: EventBus,
    state: RwLock<EngineState>,
    /// Generation of the last snapshot written
    written: Mutex<u64>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<R, S> Drop for Inner<R, S> {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.try_lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

/// Local-first front end of the task list.
///
/// Cheap to clone; clones share state.
pub struct SyncCoordinator<R, S> {
    inner: Arc<Inner<R, S>>,
}

impl<R, S> Clone for SyncCoordinator<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteTaskService, S: SnapshotStorage> SyncCoordinator<R, S> {
    /// Build a coordinator from whatever `storage` holds.
    ///
    /// A corrupt snapshot is moved aside and the coordinator starts empty. A
    /// snapshot that cannot be read at all is left where it is.
    /// Starts online; [`attach`](Self::attach) a monitor or call
    /// [`set_online`](Self::set_online) to follow the network.
    pub async fn new(remote: R, storage: S, settings: SyncSettings) -> Self {
        let limit = settings.page_limit;
        let (store, queue) = match storage.load().await {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    tasks = snapshot.tasks.len(),
                    pending = snapshot.pending_ops.len(),
                    failed = snapshot.failed_ops.len(),
                    "Snapshot loaded"
                );
                snapshot.restore(limit)
            }
            Ok(None) => (TaskStore::new(limit), PendingQueue::new()),
            Err(StorageError::Snapshot(e)) => {
                tracing::error!(error = %e, "Snapshot unreadable, starting empty");
                if let Err(e) = storage.discard().await {
                    tracing::error!(error = %e, "Failed to discard snapshot");
                }
                (TaskStore::new(limit), PendingQueue::new())
            }
            Err(e) => {
                tracing::error!(error = %e, "Snapshot could not be read, starting empty");
                (TaskStore::new(limit), PendingQueue::new())
            }
        };

        Self {
            inner: Arc::new(Inner {
                remote,
                storage,
                settings,
                events: EventBus::new(),
                state: RwLock::new(EngineState::new(store, queue)),
                written: Mutex::new(0),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Receive sync notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    // ----- mutations -----

    /// Create a task.
    ///
    /// A placeholder with a temporary id and `status = false` appears at the
    /// top of the list immediately. The returned id is the canonical one if
    /// the server answered, the temporary one otherwise.
    pub async fn add(&self, draft: TaskDraft) -> Mutation {
        let draft = TaskDraft {
            status: false,
            ..draft
        };
        let temp_id = temporary_id(Uuid::new_v4());
        let operation = PendingOperation::Add {
            draft,
            temp_id: temp_id.clone(),
            created_at: Utc::now(),
        };

        let dispatch = self
            .commit(|st| {
                if let Some(placeholder) = operation.local_task() {
                    st.store.upsert(placeholder);
                }
                st.register(operation)
            })
            .await;
        tracing::debug!(task_id = %temp_id, "Task added locally");
        self.dispatch(temp_id, dispatch).await
    }

    /// Replace a task's content.
    ///
    /// Edits to a task that was never confirmed are folded into its pending
    /// create instead of being sent as an update.
    pub async fn update(&self, task: Task) -> Result<Mutation> {
        let task_id = task.id.clone();
        self.apply_update(&task_id, move |current| *current = task)
            .await
    }

    /// Flip a task's status.
    pub async fn toggle_status(&self, task_id: &str) -> Result<Mutation> {
        self.apply_update(task_id, |task| {
            task.status = !task.status;
            task.updated_at = Some(Utc::now());
        })
        .await
    }

    /// Delete a task. Deleting an unknown id does nothing.
    pub async fn delete(&self, task_id: &str) -> Mutation {
        let dispatch = self
            .commit(|st| {
                let existed = st.store.remove_by_id(task_id).is_some();
                if is_temporary(task_id) {
                    st.cancel_add(task_id);
                    return Dispatch::Local;
                }
                if !existed {
                    return Dispatch::Local;
                }
                st.register(PendingOperation::Delete {
                    task_id: task_id.to_string(),
                })
            })
            .await;
        self.dispatch(task_id.to_string(), dispatch).await
    }

    async fn apply_update(&self, task_id: &str, edit: impl FnOnce(&mut Task)) -> Result<Mutation> {
        let dispatch = self
            .commit(|st| -> Result<Dispatch> {
                let mut task = st
                    .store
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| ClientError::TaskNotFound(task_id.to_string()))?;
                edit(&mut task);
                task.id = task_id.to_string();
                st.store.replace_existing(task.clone());

                if is_temporary(task_id) {
                    st.amend_placeholder(&task);
                    return Ok(Dispatch::Local);
                }
                Ok(st.register(PendingOperation::Update { task }))
            })
            .await?;
        Ok(self.dispatch(task_id.to_string(), dispatch).await)
    }

    // ----- fetching -----

    /// Load the first page, replacing the current list.
    pub async fn fetch_first_page(&self) -> FetchOutcome {
        let limit = self
            .with_state(|st| {
                if !st.online {
                    return None;
                }
                st.loading = true;
                Some(st.store.pagination().limit)
            })
            .await;
        let Some(limit) = limit else {
            return FetchOutcome::Offline;
        };

        let result = self.call(self.inner.remote.list_tasks(1, limit)).await;
        self.finish_fetch(result, TaskStore::replace_page).await
    }

    /// Load the next page and append what is new.
    ///
    /// Skipped while another fetch runs or once the last page was seen.
    pub async fn fetch_next_page(&self) -> FetchOutcome {
        let start = self
            .with_state(|st| {
                if !st.online {
                    return Err(FetchOutcome::Offline);
                }
                let pagination = st.store.pagination();
                if st.loading || !pagination.has_more {
                    return Err(FetchOutcome::Skipped);
                }
                st.loading = true;
                Ok(pagination)
            })
            .await;
        let pagination = match start {
            Ok(pagination) => pagination,
            Err(outcome) => return outcome,
        };

        let result = self
            .call(
                self.inner
                    .remote
                    .list_tasks(pagination.page, pagination.limit),
            )
            .await;
        self.finish_fetch(result, TaskStore::append_page).await
    }

    /// Refresh the user directory.
    pub async fn fetch_users(&self) -> FetchOutcome<usize> {
        if !self.inner.state.read().await.online {
            return FetchOutcome::Offline;
        }
        match self.call(self.inner.remote.list_users()).await {
            Ok(users) => {
                let count = users.len();
                self.commit(|st| st.store.set_users(users)).await;
                FetchOutcome::Loaded(count)
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to fetch users");
                FetchOutcome::Failed(error)
            }
        }
    }

    async fn finish_fetch(
        &self,
        result: std::result::Result<Vec<Task>, RemoteError>,
        merge: impl FnOnce(&mut TaskStore, Vec<Task>) -> PageMerge,
    ) -> FetchOutcome {
        match result {
            Ok(tasks) => {
                let merged = self
                    .commit(|st| {
                        st.loading = false;
                        let merged = merge(&mut st.store, tasks);
                        st.overlay_pending();
                        merged
                    })
                    .await;
                tracing::debug!(
                    received = merged.received,
                    added = merged.added,
                    duplicates = merged.duplicates,
                    "Page loaded"
                );
                FetchOutcome::Loaded(merged)
            }
            Err(error) => {
                self.with_state(|st| st.loading = false).await;
                tracing::warn!(error = %error, "Failed to fetch tasks");
                FetchOutcome::Failed(error)
            }
        }
    }

    // ----- replay -----

    /// Send every queued operation, oldest first.
    ///
    /// Does nothing while offline or while another pass runs. Operations that
    /// fail go back to the queue; later operations on the same task wait for
    /// the next pass so their order holds. Operations queued during a pass,
    /// or held back behind a send that has since finished, get another pass.
    pub async fn sync_pending(&self) -> ReplaySummary {
        let mut total = ReplaySummary::default();
        while let Some((summary, again)) = self.replay_pass().await {
            total.synced += summary.synced;
            total.parked += summary.parked;
            total.deferred = summary.deferred;
            if !again {
                break;
            }
        }
        total
    }

    /// Run one pass over the queue. Returns `None` if no pass could start,
    /// otherwise the pass totals and whether another pass has work to do.
    async fn replay_pass(&self) -> Option<(ReplaySummary, bool)> {
        let max_attempts = self.inner.settings.max_rejected_attempts;
        let (start, held) = self
            .with_state(|st| {
                if !st.online || st.replay.is_some() || st.queue.is_empty() {
                    return None;
                }
                let start = st.queue.next_seq();
                let held: HashSet<TaskId> =
                    st.in_flight.values().map(|e| e.task_id().clone()).collect();
                let mut batch = ReplayBatch::new(st.queue.drain(), max_attempts);
                for task_id in &held {
                    batch.hold_back(task_id);
                }
                st.replay = Some(batch);
                Some((start, held))
            })
            .await?;

        tracing::info!("Replaying pending operations");
        self.emit_phase(SyncPhase::Syncing);

        loop {
            let next = self
                .with_state(|st| {
                    if !st.online {
                        if let Some(batch) = st.replay.as_mut() {
                            batch.abort();
                        }
                        return None;
                    }
                    let entry = st.replay.as_mut()?.next()?;
                    st.begin_create(&entry.operation);
                    Some(entry)
                })
                .await;
            let Some(entry) = next else {
                break;
            };

            match self.send(&entry, Origin::Replay).await {
                Ok(delivered) => {
                    if let Some(follow_up) = delivered.follow_up {
                        let task_id = follow_up.task_id().clone();
                        let seq = self.commit(|st| st.queue.enqueue(follow_up)).await;
                        tracing::debug!(seq, task_id = %task_id, "Follow-up queued for next pass");
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        seq = entry.seq,
                        task_id = %entry.task_id(),
                        error = %error,
                        "Replay of operation failed"
                    );
                    let events = &self.inner.events;
                    self.commit(|st| st.settle_replay_failure(&entry, &error, events))
                        .await;
                }
            }
        }

        let (summary, again, phase) = self
            .commit(|st| {
                let report = st
                    .replay
                    .take()
                    .map(ReplayBatch::finish)
                    .unwrap_or_default();
                let summary = ReplaySummary {
                    synced: report.synced,
                    deferred: report.deferred.len(),
                    parked: report.parked.len(),
                };
                st.queue.restore(report.deferred);
                for failed in report.parked {
                    st.queue.park(failed);
                }
                let again = st.online
                    && st.queue.iter().any(|e| {
                        e.seq >= start
                            || (held.contains(e.task_id())
                                && !st.in_flight.values().any(|f| f.task_id() == e.task_id()))
                    });
                (summary, again, st.phase())
            })
            .await;

        tracing::info!(
            synced = summary.synced,
            deferred = summary.deferred,
            parked = summary.parked,
            "Replay finished"
        );
        self.emit_phase(phase);
        Some((summary, again))
    }

    // ----- connectivity -----

    /// Apply a connectivity change.
    ///
    /// Going online replays the queue; going offline stops a running replay
    /// after its current operation.
    pub async fn set_online(&self, online: bool) {
        if self.apply_connectivity(online).await && online {
            self.sync_pending().await;
        }
    }

    /// Record the connectivity state. Returns whether it changed.
    async fn apply_connectivity(&self, online: bool) -> bool {
        let (changed, phase) = self
            .with_state(|st| {
                let changed = st.online != online;
                st.online = online;
                if !online {
                    if let Some(batch) = st.replay.as_mut() {
                        batch.abort();
                    }
                }
                (changed, st.phase())
            })
            .await;
        if changed {
            tracing::info!(online, "Sync connectivity changed");
            self.emit_phase(phase);
        }
        changed
    }

    /// Follow a connectivity monitor.
    ///
    /// Adopts the monitor's current state right away, replaying the queue if it
    /// reports a connection, then reacts to each transition until
    /// [`detach`](Self::detach) or until the last clone of this coordinator is
    /// dropped. Attaching again replaces the previous subscription.
    pub async fn attach(&self, monitor: &ConnectivityMonitor) {
        let mut rx = monitor.subscribe();
        let connected = *rx.borrow_and_update();
        let inner = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let connected = *rx.borrow_and_update();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                SyncCoordinator { inner }.set_online(connected).await;
            }
        });

        if let Some(previous) = self.inner.listener.lock().await.replace(handle) {
            previous.abort();
        }
        self.apply_connectivity(connected).await;
        if connected {
            self.sync_pending().await;
        }
    }

    /// Stop following the monitor.
    pub async fn detach(&self) {
        if let Some(handle) = self.inner.listener.lock().await.take() {
            handle.abort();
            tracing::debug!("Connectivity listener detached");
        }
    }

    /// Detach and write a final snapshot.
    pub async fn shutdown(&self) {
        self.detach().await;
        self.commit(|_| ()).await;
        tracing::info!("Sync coordinator shut down");
    }

    // ----- failed operations -----

    /// Drop a parked operation.
    ///
    /// A parked create also takes its placeholder with it, since the task
    /// never existed on the server.
    pub async fn acknowledge_failure(&self, seq: Seq) -> Result<FailedOp> {
        self.commit(|st| -> Result<FailedOp> {
            let failed = st.queue.acknowledge(seq)?;
            if let PendingOperation::Add { temp_id, .. } = &failed.entry.operation {
                st.store.remove_by_id(temp_id);
            }
            Ok(failed)
        })
        .await
    }

    /// Give a parked operation a fresh set of attempts and replay.
    pub async fn retry_failed(&self, seq: Seq) -> Result<ReplaySummary> {
        self.commit(|st| st.queue.retry(seq)).await?;
        Ok(self.sync_pending().await)
    }

    // ----- reads -----

    /// Every stored task, newest first.
    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.state.read().await.store.tasks().to_vec()
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.state.read().await.store.get(task_id).cloned()
    }

    /// Tasks matching `filter`. The store is not touched.
    pub async fn filtered_view(&self, filter: &Filter) -> Vec<Task> {
        let state = self.inner.state.read().await;
        state
            .store
            .filtered_view(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Tasks matching the active filter.
    pub async fn visible_tasks(&self) -> Vec<Task> {
        let state = self.inner.state.read().await;
        state.store.visible().into_iter().cloned().collect()
    }

    pub async fn filter(&self) -> Filter {
        self.inner.state.read().await.store.filter().clone()
    }

    pub async fn set_filter(&self, filter: Filter) {
        self.with_state(|st| st.store.set_filter(filter)).await;
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.state.read().await.store.users().to_vec()
    }

    pub async fn sync_state(&self) -> SyncState {
        let state = self.inner.state.read().await;
        let pagination = state.store.pagination();
        SyncState {
            online: state.online,
            phase: state.phase(),
            page: pagination.page,
            limit: pagination.limit,
            has_more: pagination.has_more,
            loading: state.loading,
            pending: state.pending().len(),
            failed: state.queue.failed().len(),
        }
    }

    /// Unacknowledged operations, oldest first.
    pub async fn pending_operations(&self) -> Vec<QueuedOp> {
        let state = self.inner.state.read().await;
        state.pending().into_iter().cloned().collect()
    }

    pub async fn failed_operations(&self) -> Vec<FailedOp> {
        self.inner.state.read().await.queue.failed().to_vec()
    }

    // ----- internals -----

    async fn dispatch(&self, task_id: TaskId, dispatch: Dispatch) -> Mutation {
        match dispatch {
            Dispatch::Send(entry) => self.deliver(entry).await,
            Dispatch::Waiting { seq, kind } => {
                self.notice(&task_id, &Dispatch::Waiting { seq, kind });
                self.sync_pending().await;
                Mutation {
                    outcome: self.settled(seq).await,
                    task_id,
                }
            }
            other => Mutation {
                outcome: self.notice(&task_id, &other),
                task_id,
            },
        }
    }

    /// Outcome of an operation that is not sent now.
    fn notice(&self, task_id: &TaskId, dispatch: &Dispatch) -> MutationOutcome {
        let (seq, kind, reason) = match dispatch {
            Dispatch::Queued { seq, kind } => (*seq, *kind, "offline"),
            Dispatch::Waiting { seq, kind } => (*seq, *kind, "waiting for an earlier change"),
            _ => return MutationOutcome::LocalOnly,
        };
        tracing::debug!(seq, task_id = %task_id, %kind, reason, "Operation queued");
        self.inner.events.emit(SyncEvent::Queued {
            seq,
            task_id: task_id.clone(),
            kind,
            reason: reason.into(),
        });
        MutationOutcome::Queued { seq }
    }

    /// Where a queued operation stands after a replay pass.
    async fn settled(&self, seq: Seq) -> MutationOutcome {
        let state = self.inner.state.read().await;
        if state.pending().iter().any(|e| e.seq == seq) {
            return MutationOutcome::Queued { seq };
        }
        match state.queue.failed().iter().find(|f| f.entry.seq == seq) {
            Some(failed) => MutationOutcome::Rejected {
                seq,
                message: failed.reason.clone(),
            },
            None => MutationOutcome::Synced,
        }
    }

    /// Send an operation now, following up on what the server's answer
    /// leaves owed.
    async fn deliver(&self, entry: QueuedOp) -> Mutation {
        let max_attempts = self.inner.settings.max_rejected_attempts;
        let first_seq = entry.seq;
        let mut task_id = entry.task_id().clone();
        let mut outcome = None;
        let mut next = Some(entry);

        while let Some(entry) = next.take() {
            match self.send(&entry, Origin::Immediate).await {
                Ok(delivered) => {
                    if outcome.is_none() {
                        if let Some(canonical_id) = delivered.canonical_id {
                            task_id = canonical_id;
                        }
                        outcome = Some(MutationOutcome::Synced);
                    }
                    if let Some(follow_up) = delivered.follow_up {
                        let follow_id = follow_up.task_id().clone();
                        match self.commit(|st| st.register(follow_up)).await {
                            Dispatch::Send(entry) => next = Some(entry),
                            other => {
                                self.notice(&follow_id, &other);
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        seq = entry.seq,
                        task_id = %entry.task_id(),
                        error = %error,
                        "Operation failed, keeping it for replay"
                    );
                    let events = &self.inner.events;
                    let failed = self
                        .commit(|st| st.settle_failure(&entry, &error, max_attempts, events))
                        .await;
                    outcome.get_or_insert(failed);
                }
            }
        }

        // Operations that queued up behind this one can go now
        let waiting = self
            .inner
            .state
            .read()
            .await
            .queue
            .iter()
            .any(|e| e.seq > first_seq);
        if waiting {
            self.sync_pending().await;
        }

        Mutation {
            task_id,
            outcome: outcome.unwrap_or(MutationOutcome::LocalOnly),
        }
    }

    /// Perform one operation against the server and reconcile its answer.
    async fn send(
        &self,
        entry: &QueuedOp,
        origin: Origin,
    ) -> std::result::Result<Delivered, RemoteError> {
        let seq = entry.seq;
        let kind = entry.operation.kind();

        match &entry.operation {
            PendingOperation::Add {
                draft,
                temp_id,
                created_at,
            } => {
                let request = CreateTaskRequest::from_draft(draft, *created_at);
                let created = self.call(self.inner.remote.create_task(&request)).await?;
                let task_id = created.id.clone();
                let follow_up = self
                    .commit(|st| {
                        st.resolve(seq, origin);
                        st.finish_create(temp_id, created)
                    })
                    .await;

                tracing::info!(temp_id = %temp_id, task_id = %task_id, "Task created");
                self.inner.events.emit(SyncEvent::Synced {
                    task_id: task_id.clone(),
                    kind,
                });
                Ok(Delivered {
                    canonical_id: Some(task_id),
                    follow_up,
                })
            }
            PendingOperation::Update { task } => {
                let saved = self.call(self.inner.remote.update_task(task)).await?;
                let applied = self
                    .commit(|st| {
                        st.resolve(seq, origin);
                        st.finish_update(task, saved)
                    })
                    .await;
                if !applied {
                    tracing::debug!(task_id = %task.id, "Stale update response discarded");
                }

                self.inner.events.emit(SyncEvent::Synced {
                    task_id: task.id.clone(),
                    kind,
                });
                Ok(Delivered::default())
            }
            PendingOperation::Delete { task_id } => {
                match self.call(self.inner.remote.delete_task(task_id)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(task_id = %task_id, "Task already gone on server");
                    }
                    Err(e) => return Err(e),
                }
                self.commit(|st| st.resolve(seq, origin)).await;

                self.inner.events.emit(SyncEvent::Synced {
                    task_id: task_id.clone(),
                    kind,
                });
                Ok(Delivered::default())
            }
        }
    }

    /// Run a remote call under the configured timeout.
    async fn call<T>(
        &self,
        request: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        let timeout = self.inner.settings.request_timeout;
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Unavailable(format!(
                "request timed out after {timeout:?}"
            ))),
        }
    }

    /// Mutate state without persisting it.
    async fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let mut state = self.inner.state.write().await;
        f(&mut state)
    }

    /// Mutate state, then persist the result.
    async fn commit<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let (output, snapshot, generation) = {
            let mut state = self.inner.state.write().await;
            let output = f(&mut state);
            state.generation += 1;
            (output, state.snapshot(), state.generation)
        };
        self.persist(snapshot, generation).await;
        output
    }

    /// Write a snapshot unless a newer one was written already.
    async fn persist(&self, snapshot: Snapshot, generation: u64) {
        let mut written = self.inner.written.lock().await;
        if generation <= *written {
            return;
        }
        match self.inner.storage.save(&snapshot).await {
            Ok(()) => *written = generation,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist snapshot");
                self.inner.events.emit(SyncEvent::PersistFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    fn emit_phase(&self, phase: SyncPhase) {
        self.inner.events.emit(SyncEvent::PhaseChanged { phase });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tasksync_engine::Timestamp;

    fn ts() -> Timestamp {
        Utc.timestamp_opt(1_706_745_600, 0).unwrap()
    }

    fn server_task(id: &str, title: &str) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            status: false,
            user_id: "u1".into(),
            created_at: ts(),
            updated_at: None,
        }
    }

    fn online_state_with_add(title: &str) -> (EngineState, QueuedOp) {
        let mut state = EngineState::new(TaskStore::new(10), PendingQueue::new());
        let operation = PendingOperation::Add {
            draft: TaskDraft::new(title, "u1"),
            temp_id: "temp-1".into(),
            created_at: ts(),
        };
        state.store.upsert(operation.local_task().unwrap());
        let Dispatch::Send(entry) = state.register(operation) else {
            panic!("expected an immediate send");
        };
        (state, entry)
    }

    #[test]
    fn register_offline_queues() {
        let mut state = EngineState::new(TaskStore::new(10), PendingQueue::new());
        state.online = false;

        let dispatch = state.register(PendingOperation::Delete {
            task_id: "1".into(),
        });

        assert!(matches!(dispatch, Dispatch::Queued { seq: 0, .. }));
        assert_eq!(state.queue.len(), 1);
        assert!(state.in_flight.is_empty());
    }

    #[test]
    fn register_waits_behind_outstanding_operation_on_same_task() {
        let mut state = EngineState::new(TaskStore::new(10), PendingQueue::new());
        let update = |title: &str| PendingOperation::Update {
            task: server_task("1", title),
        };

        assert!(matches!(state.register(update("a")), Dispatch::Send(_)));
        assert!(matches!(
            state.register(update("b")),
            Dispatch::Waiting { seq: 1, .. }
        ));
        assert!(matches!(
            state.register(PendingOperation::Delete {
                task_id: "1".into()
            }),
            Dispatch::Waiting { seq: 2, .. }
        ));
        assert!(matches!(
            state.register(PendingOperation::Delete {
                task_id: "2".into()
            }),
            Dispatch::Send(_)
        ));
        assert_eq!(state.queue.len(), 2);
    }

    #[test]
    fn in_flight_entries_are_persisted() {
        let (state, entry) = online_state_with_add("draft");
        let snapshot = state.snapshot();
        assert_eq!(snapshot.pending_ops, vec![entry]);
    }

    #[test]
    fn finish_create_swaps_placeholder() {
        let (mut state, entry) = online_state_with_add("draft");
        state.resolve(entry.seq, Origin::Immediate);

        let follow_up = state.finish_create("temp-1", server_task("42", "draft"));

        assert!(follow_up.is_none());
        assert!(!state.store.contains("temp-1"));
        assert_eq!(state.store.get("42").unwrap().title, "draft");
        assert!(state.pending().is_empty());
    }

    #[test]
    fn finish_create_after_local_edit_owes_update() {
        let (mut state, _) = online_state_with_add("draft");
        let mut edited = state.store.get("temp-1").cloned().unwrap();
        edited.title = "edited".into();
        state.store.replace_existing(edited.clone());
        state.amend_placeholder(&edited);

        let follow_up = state.finish_create("temp-1", server_task("42", "draft"));

        match follow_up {
            Some(PendingOperation::Update { task }) => {
                assert_eq!(task.id, "42");
                assert_eq!(task.title, "edited");
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(state.store.get("42").unwrap().title, "edited");
    }

    #[test]
    fn finish_create_after_local_delete_owes_delete() {
        let (mut state, _) = online_state_with_add("draft");
        state.store.remove_by_id("temp-1");
        state.cancel_add("temp-1");

        let follow_up = state.finish_create("temp-1", server_task("42", "draft"));

        assert_eq!(
            follow_up,
            Some(PendingOperation::Delete {
                task_id: "42".into()
            })
        );
        assert!(state.store.is_empty());
    }

    #[test]
    fn stale_update_response_is_discarded() {
        let mut state = EngineState::new(TaskStore::new(10), PendingQueue::new());
        state.store.upsert(server_task("1", "second edit"));

        let sent = server_task("1", "first edit");
        assert!(!state.finish_update(&sent, server_task("1", "first edit")));
        assert_eq!(state.store.get("1").unwrap().title, "second edit");

        let sent = server_task("1", "second edit");
        let mut saved = sent.clone();
        saved.updated_at = Some(ts());
        assert!(state.finish_update(&sent, saved));
        assert_eq!(state.store.get("1").unwrap().updated_at, Some(ts()));
    }

    #[test]
    fn overlay_keeps_in_flight_placeholder() {
        let (mut state, _) = online_state_with_add("draft");
        state.store.replace_page(vec![server_task("1", "server")]);

        state.overlay_pending();

        let ids: Vec<_> = state.store.ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["temp-1", "1"]);
    }

    #[test]
    fn failed_send_moves_entry_to_queue() {
        let (mut state, entry) = online_state_with_add("draft");
        let events = EventBus::new();

        let outcome = state.settle_failure(
            &entry,
            &RemoteError::Unavailable("503".into()),
            3,
            &events,
        );

        assert_eq!(outcome, MutationOutcome::Queued { seq: entry.seq });
        assert!(state.in_flight.is_empty());
        assert_eq!(state.queue.iter().next().unwrap().attempts, 1);
    }

    #[test]
    fn rejected_send_parks_at_limit() {
        let (mut state, entry) = online_state_with_add("draft");
        let events = EventBus::new();
        let error = RemoteError::Rejected {
            status: 422,
            message: "title required".into(),
        };

        let outcome = state.settle_failure(&entry, &error, 1, &events);

        assert!(matches!(outcome, MutationOutcome::Rejected { .. }));
        assert!(state.queue.is_empty());
        assert_eq!(state.queue.failed().len(), 1);
    }
}
