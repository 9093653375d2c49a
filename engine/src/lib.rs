//! # tasksync engine
//!
//! Deterministic core of a local-first task synchronization engine.
//!
//! This crate holds the state a task client keeps while it may be offline:
//! the task list the UI renders from, the log of mutations that still have to
//! reach the server, and the bookkeeping for replaying that log once the
//! connection returns.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, clocks or randomness; timestamps and ids
//!   are passed in
//! - **Deterministic**: same inputs always produce the same state
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Tasks
//!
//! A [`Task`] has either a *temporary* id (see [`temporary_id`]) while it only
//! exists locally, or the *canonical* id the server assigned. The
//! [`TaskStore`] holds at most one task per id, newest first, plus the
//! pagination cursor and the active [`Filter`].
//!
//! ### Pending operations
//!
//! Mutations that could not be sent are recorded as [`PendingOperation`]s in
//! the [`PendingQueue`], each with a sequence number. An add that is deleted
//! before it was ever sent is cancelled in place and never reaches the server.
//!
//! ### Replay
//!
//! On reconnect the queue is drained into a [`ReplayBatch`], which hands out
//! entries in recording order and decides, per failure, whether an entry is
//! deferred to the next pass or parked for the user.
//!
//! ## Quick Start
//!
//! ```rust
//! use tasksync_engine::{
//!     temporary_id, Filter, PendingOperation, PendingQueue, Task, TaskDraft, TaskStore,
//! };
//! use chrono::Utc;
//!
//! let mut store = TaskStore::new(10);
//! let mut queue = PendingQueue::new();
//!
//! // Offline add: placeholder in the store, operation in the queue
//! let draft = TaskDraft::new("Water plants", "user-1");
//! let temp_id = temporary_id("a1");
//! let now = Utc::now();
//! store.upsert(Task::placeholder(temp_id.clone(), &draft, now));
//! queue.enqueue(PendingOperation::Add {
//!     draft,
//!     temp_id: temp_id.clone(),
//!     created_at: now,
//! });
//!
//! // Deleting it before reconnecting cancels the add
//! store.remove_by_id(&temp_id);
//! assert!(queue.cancel_pending_add(&temp_id));
//! assert!(queue.is_empty());
//! assert!(store.filtered_view(&Filter::all()).is_empty());
//! ```
//!
//! ## Persistence
//!
//! [`Snapshot::capture`] and [`Snapshot::restore`] convert between the live
//! store/queue and a JSON-serializable [`Snapshot`].

pub mod error;
pub mod filter;
pub mod operation;
pub mod queue;
pub mod replay;
pub mod snapshot;
pub mod store;
pub mod task;

// Re-export main types at crate root
pub use error::Error;
pub use filter::Filter;
pub use operation::{FailedOp, FailureKind, OperationKind, PendingOperation, QueuedOp};
pub use queue::{amend_add, overlay, PendingQueue};
pub use replay::{Disposition, ReplayBatch, ReplayReport, DEFAULT_MAX_REJECTED_ATTEMPTS};
pub use snapshot::{Snapshot, SNAPSHOT_FORMAT_VERSION, STORAGE_NAMESPACE};
pub use store::{PageMerge, Pagination, TaskStore, DEFAULT_PAGE_LIMIT};
pub use task::{is_temporary, temporary_id, Task, TaskDraft, User, TEMP_ID_PREFIX};

/// Type aliases for clarity
pub type TaskId = String;
pub type UserId = String;
pub type Seq = u64;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
