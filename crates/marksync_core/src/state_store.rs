//! Persistent mapping from document path to last-synced snapshot.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Version of the on-disk state file format.
pub const STATE_FILE_VERSION: u32 = 1;

/// The last-synced baseline for one document.
///
/// Created on the first successful create/update, mutated on every
/// subsequent successful sync, and deleted when the local document
/// disappears. The engine never caches a snapshot across calls; the store
/// is the single owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// When the last successful sync finished.
    pub last_synced_at: DateTime<Utc>,
    /// Local modification time captured at last sync.
    pub local_modified_at: DateTime<Utc>,
    /// Remote-reported update time captured at last sync.
    pub remote_updated_at: DateTime<Utc>,
    /// Identifier of the linked remote record, once one exists.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remote_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    state: BTreeMap<String, SyncSnapshot>,
}

#[derive(Debug)]
struct DiskBinding {
    path: PathBuf,
    // Held for the lifetime of the store; dropping releases the lock.
    _lock: File,
}

/// The sync state store.
///
/// An in-memory map with an optional disk binding. `flush` persists the map
/// as a JSON document `{ "version": 1, "state": { <path>: snapshot } }`,
/// written atomically (temp file + rename).
///
/// # Cross-process safety
///
/// A disk-backed store holds an advisory exclusive lock on a `.lock`
/// sidecar for its whole lifetime. A second process opening the same state
/// file fails fast with [`CoreError::StoreLocked`] instead of racing.
#[derive(Debug)]
pub struct SyncStateStore {
    entries: RwLock<BTreeMap<String, SyncSnapshot>>,
    disk: Option<DiskBinding>,
}

impl SyncStateStore {
    /// Creates a store with no disk binding. `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            disk: None,
        }
    }

    /// Opens a disk-backed store, loading existing state if the file exists.
    ///
    /// # Errors
    ///
    /// Fails if another process holds the lock, if the file cannot be read,
    /// or if its version is not understood.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        let lock = File::create(PathBuf::from(lock_path))?;
        lock.try_lock_exclusive().map_err(|_| CoreError::StoreLocked {
            path: path.display().to_string(),
        })?;

        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let file: StateFile = serde_json::from_str(&raw)?;
                if file.version != STATE_FILE_VERSION {
                    return Err(CoreError::UnsupportedVersion {
                        found: file.version,
                        expected: STATE_FILE_VERSION,
                    });
                }
                file.state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CoreError::Io(e)),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "state store opened");

        Ok(Self {
            entries: RwLock::new(entries),
            disk: Some(DiskBinding { path, _lock: lock }),
        })
    }

    /// Reads a state file without locking or binding to it.
    ///
    /// For inspection tooling only; the returned map is a point-in-time copy.
    pub fn peek(path: &Path) -> CoreResult<BTreeMap<String, SyncSnapshot>> {
        let raw = std::fs::read_to_string(path)?;
        let file: StateFile = serde_json::from_str(&raw)?;
        if file.version != STATE_FILE_VERSION {
            return Err(CoreError::UnsupportedVersion {
                found: file.version,
                expected: STATE_FILE_VERSION,
            });
        }
        Ok(file.state)
    }

    /// Returns the snapshot for a document, if one exists.
    pub fn get(&self, path: &str) -> Option<SyncSnapshot> {
        self.entries.read().get(path).cloned()
    }

    /// Stores the snapshot for a document.
    pub fn set(&self, path: impl Into<String>, snapshot: SyncSnapshot) {
        self.entries.write().insert(path.into(), snapshot);
    }

    /// Removes a document's snapshot. Returns true if one was present.
    pub fn clear(&self, path: &str) -> bool {
        self.entries.write().remove(path).is_some()
    }

    /// Finds the document linked to a remote record id.
    pub fn reverse_lookup(&self, remote_id: &str) -> Option<(String, SyncSnapshot)> {
        self.entries
            .read()
            .iter()
            .find(|(_, snap)| snap.remote_id.as_deref() == Some(remote_id))
            .map(|(path, snap)| (path.clone(), snap.clone()))
    }

    /// Returns all tracked document paths.
    pub fn paths(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of tracked documents.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no documents are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Persists the store to its state file, atomically.
    ///
    /// A no-op for in-memory stores.
    pub fn flush(&self) -> CoreResult<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };

        let file = StateFile {
            version: STATE_FILE_VERSION,
            state: self.entries.read().clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;

        let mut tmp = disk.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &disk.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(remote_id: Option<&str>) -> SyncSnapshot {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        SyncSnapshot {
            last_synced_at: ts,
            local_modified_at: ts,
            remote_updated_at: ts,
            remote_id: remote_id.map(str::to_string),
        }
    }

    #[test]
    fn memory_store_crud() {
        let store = SyncStateStore::in_memory();
        assert!(store.is_empty());

        store.set("notes/a.md", snapshot(Some("rec-1")));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("notes/a.md").unwrap().remote_id.as_deref(),
            Some("rec-1")
        );

        let (path, _) = store.reverse_lookup("rec-1").unwrap();
        assert_eq!(path, "notes/a.md");
        assert!(store.reverse_lookup("rec-2").is_none());

        assert!(store.clear("notes/a.md"));
        assert!(!store.clear("notes/a.md"));
        assert!(store.is_empty());
    }

    #[test]
    fn disk_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = SyncStateStore::open(&path).unwrap();
            store.set("notes/a.md", snapshot(Some("rec-1")));
            store.set("notes/b.md", snapshot(None));
            store.flush().unwrap();
        }

        let store = SyncStateStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        let snap = store.get("notes/a.md").unwrap();
        assert_eq!(snap.remote_id.as_deref(), Some("rec-1"));
        assert_eq!(snap, snapshot(Some("rec-1")));
    }

    #[test]
    fn disk_store_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99, "state": {}}"#).unwrap();

        let err = SyncStateStore::open(&path).unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn second_open_is_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let _first = SyncStateStore::open(&path).unwrap();
        let err = SyncStateStore::open(&path).unwrap_err();
        assert!(matches!(err, CoreError::StoreLocked { .. }));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = SyncStateStore::open(&path).unwrap();
            store.flush().unwrap();
        }
        // The first store is gone, so reopening succeeds.
        SyncStateStore::open(&path).unwrap();
    }

    #[test]
    fn peek_reads_without_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = SyncStateStore::open(&path).unwrap();
        store.set("a.md", snapshot(Some("rec-9")));
        store.flush().unwrap();

        // Peek works even while the store holds its lock.
        let state = SyncStateStore::peek(&path).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state["a.md"].remote_id.as_deref(), Some("rec-9"));
    }

    #[test]
    fn flush_is_noop_in_memory() {
        let store = SyncStateStore::in_memory();
        store.set("a.md", snapshot(None));
        store.flush().unwrap();
    }
}
