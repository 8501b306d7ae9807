//! Error types for core storage operations.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from the document store, frontmatter codec, and state store.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The document does not exist. This is how deletion is detected,
    /// so it is kept distinct from other I/O failures.
    #[error("document not found: {path}")]
    DocumentNotFound {
        /// Document path.
        path: String,
    },

    /// An I/O error from the underlying filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The persisted state file has a version this build does not understand.
    #[error("unsupported state file version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// Another process holds the state store lock.
    #[error("state store is locked by another process: {path}")]
    StoreLocked {
        /// Path to the state file.
        path: String,
    },
}

impl CoreError {
    /// Returns true if this error means the document is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::DocumentNotFound { .. })
    }
}
