//! # Tasksync Client
//!
//! Offline-first task list client. Changes apply to the local store at once
//! and reach the server either immediately or, while offline, through a
//! durable queue that is replayed in order when connectivity returns.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tasksync_client::{
//!     ConnectivityMonitor, FileStorage, HttpTaskService, SyncCoordinator, SyncSettings,
//! };
//! use tasksync_engine::TaskDraft;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SyncSettings::default();
//! let remote = HttpTaskService::new("http://localhost:3000", settings.request_timeout)?;
//! let coordinator = SyncCoordinator::new(remote, FileStorage::new(".tasksync"), settings).await;
//!
//! let monitor = ConnectivityMonitor::new(true);
//! coordinator.attach(&monitor).await;
//!
//! coordinator.fetch_first_page().await;
//! let created = coordinator.add(TaskDraft::new("Write report", "u1")).await;
//! println!("{} -> {:?}", created.task_id, created.outcome);
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Remote failures are never returned as errors from mutations; subscribe to
//! [`SyncEvent`]s to surface them.

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod remote;
pub mod storage;

pub use config::{Config, ConfigError, SyncSettings};
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{
    FetchOutcome, Mutation, MutationOutcome, ReplaySummary, SyncCoordinator, SyncState,
};
pub use error::{ClientError, Result, StorageError};
pub use events::{EventBus, SyncEvent, SyncPhase};
pub use remote::{CreateTaskRequest, HttpTaskService, RemoteError, RemoteTaskService};
pub use storage::{FileStorage, MemoryStorage, SnapshotStorage};
