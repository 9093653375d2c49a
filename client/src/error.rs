//! Unified error handling for the client.

use crate::config::ConfigError;
use crate::remote::RemoteError;

/// Snapshot storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] tasksync_engine::Error),
}

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] tasksync_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
