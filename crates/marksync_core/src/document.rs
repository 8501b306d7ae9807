//! Document store abstraction with filesystem and in-memory backends.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

/// A store of local documents addressed by vault-relative path.
///
/// The engine only needs three operations: read a document, replace it
/// atomically, and stat its modification time. `stat` must fail with
/// [`CoreError::DocumentNotFound`] when the path no longer exists; that is
/// how deletion is detected.
pub trait DocumentStore: Send + Sync {
    /// Reads the full text of a document.
    fn read(&self, path: &str) -> impl Future<Output = CoreResult<String>> + Send;

    /// Replaces a document's content atomically.
    ///
    /// A crash mid-write must never leave a half-written document: either
    /// the old content or the new content is observed, nothing in between.
    fn write(&self, path: &str, content: &str) -> impl Future<Output = CoreResult<()>> + Send;

    /// Returns the document's last modification time.
    fn stat(&self, path: &str) -> impl Future<Output = CoreResult<DateTime<Utc>>> + Send;
}

/// A filesystem-backed document store rooted at a vault directory.
///
/// Writes go to a temporary file in the same directory followed by a
/// rename, so concurrent readers and crashes never observe partial content.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn map_io(path: &str, err: std::io::Error) -> CoreError {
        if err.kind() == std::io::ErrorKind::NotFound {
            CoreError::DocumentNotFound { path: path.into() }
        } else {
            CoreError::Io(err)
        }
    }
}

impl DocumentStore for FsDocumentStore {
    async fn read(&self, path: &str) -> CoreResult<String> {
        tokio::fs::read_to_string(self.resolve(path))
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn write(&self, path: &str, content: &str) -> CoreResult<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-to-temp then rename keeps the replacement atomic.
        let mut tmp = target.clone().into_os_string();
        tmp.push(".marksync-tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> CoreResult<DateTime<Utc>> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| Self::map_io(path, e))?;
        let modified = meta.modified().map_err(CoreError::Io)?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

#[derive(Debug, Clone)]
struct MemoryDoc {
    content: String,
    modified: DateTime<Utc>,
}

/// An in-memory document store for tests.
///
/// Modification times can be pinned explicitly so conflict-detection
/// scenarios are reproducible without touching a real filesystem clock.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, MemoryDoc>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document with the current time as its mtime.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        self.insert_with_mtime(path, content, Utc::now());
    }

    /// Inserts a document with an explicit modification time.
    pub fn insert_with_mtime(
        &self,
        path: impl Into<String>,
        content: impl Into<String>,
        modified: DateTime<Utc>,
    ) {
        self.docs.write().insert(
            path.into(),
            MemoryDoc {
                content: content.into(),
                modified,
            },
        );
    }

    /// Removes a document, simulating deletion from disk.
    pub fn remove(&self, path: &str) -> bool {
        self.docs.write().remove(path).is_some()
    }

    /// Overrides a document's modification time.
    pub fn set_modified(&self, path: &str, modified: DateTime<Utc>) {
        if let Some(doc) = self.docs.write().get_mut(path) {
            doc.modified = modified;
        }
    }

    /// Returns a document's current content, if present.
    pub fn content(&self, path: &str) -> Option<String> {
        self.docs.read().get(path).map(|d| d.content.clone())
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> CoreResult<String> {
        self.docs
            .read()
            .get(path)
            .map(|d| d.content.clone())
            .ok_or_else(|| CoreError::DocumentNotFound { path: path.into() })
    }

    async fn write(&self, path: &str, content: &str) -> CoreResult<()> {
        let mut docs = self.docs.write();
        docs.insert(
            path.to_string(),
            MemoryDoc {
                content: content.to_string(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stat(&self, path: &str) -> CoreResult<DateTime<Utc>> {
        self.docs
            .read()
            .get(path)
            .map(|d| d.modified)
            .ok_or_else(|| CoreError::DocumentNotFound { path: path.into() })
    }
}
