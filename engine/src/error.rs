//! Error types for the tasksync engine.

use crate::{Seq, TaskId};
use thiserror::Error;

/// All possible errors from the tasksync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("operation not found: {0}")]
    OperationNotFound(Seq),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("unsupported snapshot format version: {found} (max supported: {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TaskNotFound("42".into());
        assert_eq!(err.to_string(), "task not found: 42");

        let err = Error::OperationNotFound(7);
        assert_eq!(err.to_string(), "operation not found: 7");

        let err = Error::UnsupportedSnapshotVersion {
            found: 9,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "unsupported snapshot format version: 9 (max supported: 1)"
        );
    }
}
