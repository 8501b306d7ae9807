//! Error types for the sync engine.

use marksync_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store rejected or failed an operation.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A local document operation failed.
    #[error("document error: {0}")]
    Document(#[from] CoreError),

    /// A state store operation failed.
    #[error("state store error: {0}")]
    State(CoreError),

    /// The document's frontmatter and the state store disagree about
    /// whether it is tracked. Retrying cannot fix this.
    #[error("inconsistent sync state for {path}: {reason}")]
    InconsistentState {
        /// Document path.
        path: String,
        /// What disagrees.
        reason: String,
    },

    /// No destination type is mapped for the document's folder.
    #[error("no destination type mapped for folder {folder:?}")]
    UnmappedFolder {
        /// The folder that had no mapping.
        folder: String,
    },

    /// Request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the queue may retry the failed operation.
    ///
    /// Only remote faults the collaborator classified as transient are
    /// retryable. Inconsistent state is a detected condition a retry
    /// cannot change, and local I/O failures surface immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::InconsistentState { .. }
            | SyncError::UnmappedFolder { .. }
            | SyncError::Serialization(_)
            | SyncError::Document(_)
            | SyncError::State(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::remote_retryable("rate limited").is_retryable());
        assert!(!SyncError::remote_fatal("bad request").is_retryable());
        assert!(!SyncError::InconsistentState {
            path: "a.md".into(),
            reason: "id without snapshot".into()
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::UnmappedFolder {
            folder: "projects".into(),
        };
        assert!(err.to_string().contains("projects"));
    }
}
