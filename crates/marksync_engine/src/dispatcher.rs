//! Per-document sync dispatch.
//!
//! Given one changed document path, decide whether the correct action is
//! create, update, pull, delete-tracking, or skip, and drive the executor
//! accordingly. Classification is explicit: a document is `Untracked`,
//! `Tracked`, or `Inconsistent`, never inferred from loose combinations
//! of optional fields at the point of use.

use crate::config::ContainerConfig;
use crate::conflict::{self, ConflictResult, ResolutionStrategy};
use crate::error::{SyncError, SyncResult};
use crate::executor::{RollbackEntry, SyncExecutor, SyncOperation};
use crate::remote::{RemoteClient, RemoteRecord};
use chrono::{DateTime, Utc};
use marksync_core::frontmatter::{self, SYNCED_AT_KEY};
use marksync_core::{DocumentStore, SyncSnapshot, SyncStateStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the dispatcher did for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// A remote record was created and linked.
    Created,
    /// The local document was pushed into its remote record.
    Updated,
    /// The remote record was pulled into the local document.
    Pulled,
    /// Nothing to do.
    Skipped,
    /// The vanished document's tracking state was cleared.
    Deleted,
    /// Both sides changed; manual resolution required.
    Conflict,
    /// The dispatch failed.
    Failed,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Pulled => "pulled",
            SyncAction::Skipped => "skipped",
            SyncAction::Deleted => "deleted",
            SyncAction::Conflict => "conflict",
            SyncAction::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Result of dispatching one document.
#[derive(Debug, Clone)]
pub struct SyncItemResult {
    /// Document path.
    pub path: String,
    /// What happened.
    pub action: SyncAction,
    /// The linked remote record id, when one is involved.
    pub remote_id: Option<String>,
    /// Failure message for `Failed` outcomes.
    pub error: Option<String>,
    /// Whether a `Failed` outcome may be retried.
    pub retryable: bool,
    /// The detector's verdict for `Conflict` outcomes, diff included.
    pub conflict: Option<ConflictResult>,
    /// Measured dispatch duration.
    pub duration: Duration,
}

impl SyncItemResult {
    fn done(path: &str, action: SyncAction, remote_id: Option<String>, start: Instant) -> Self {
        Self {
            path: path.to_string(),
            action,
            remote_id,
            error: None,
            retryable: false,
            conflict: None,
            duration: start.elapsed(),
        }
    }

    fn failed(path: &str, error: &SyncError, start: Instant) -> Self {
        Self {
            path: path.to_string(),
            action: SyncAction::Failed,
            remote_id: None,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
            conflict: None,
            duration: start.elapsed(),
        }
    }

    pub(crate) fn failed_message(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            action: SyncAction::Failed,
            remote_id: None,
            error: Some(message.into()),
            retryable: false,
            conflict: None,
            duration: Duration::ZERO,
        }
    }
}

/// Tracking status of a document, derived from its frontmatter and the
/// state store.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSyncStatus {
    /// No remote id and no snapshot: never synced.
    Untracked,
    /// Remote id and snapshot agree.
    Tracked {
        /// The linked record id.
        remote_id: String,
        /// The last-synced baseline.
        snapshot: SyncSnapshot,
    },
    /// Frontmatter and state store disagree. A data-integrity signal,
    /// not a transient fault.
    Inconsistent {
        /// What disagrees.
        reason: String,
    },
}

/// Derives the tracking status from the two independent sources.
pub fn classify_document(
    frontmatter_id: Option<String>,
    snapshot: Option<SyncSnapshot>,
) -> DocumentSyncStatus {
    match (frontmatter_id, snapshot) {
        (None, None) => DocumentSyncStatus::Untracked,
        (Some(id), Some(snapshot)) => match snapshot.remote_id.as_deref() {
            Some(snap_id) if snap_id == id => DocumentSyncStatus::Tracked {
                remote_id: id,
                snapshot,
            },
            Some(snap_id) => DocumentSyncStatus::Inconsistent {
                reason: format!(
                    "document is linked to {id} but the snapshot records {snap_id}"
                ),
            },
            None => DocumentSyncStatus::Inconsistent {
                reason: "document carries a remote id but the snapshot has none".into(),
            },
        },
        (Some(_), None) => DocumentSyncStatus::Inconsistent {
            reason: "document carries a remote id but no snapshot exists".into(),
        },
        (None, Some(_)) => DocumentSyncStatus::Inconsistent {
            reason: "a snapshot exists but the document carries no remote id".into(),
        },
    }
}

/// Dispatches single documents through the executor.
pub struct SyncDispatcher<C, D> {
    remote: Arc<C>,
    documents: Arc<D>,
    state: Arc<SyncStateStore>,
    executor: SyncExecutor<C, D>,
    config: ContainerConfig,
}

impl<C: RemoteClient, D: DocumentStore> SyncDispatcher<C, D> {
    /// Creates a dispatcher for one container pairing.
    pub fn new(
        remote: Arc<C>,
        documents: Arc<D>,
        state: Arc<SyncStateStore>,
        config: ContainerConfig,
    ) -> Self {
        let executor = SyncExecutor::new(
            Arc::clone(&remote),
            Arc::clone(&documents),
            Arc::clone(&state),
            config.container_id.clone(),
        );
        Self {
            remote,
            documents,
            state,
            executor,
            config,
        }
    }

    /// Returns the executor for one-shot batch calls.
    pub fn executor(&self) -> &SyncExecutor<C, D> {
        &self.executor
    }

    /// Paths that currently have a persisted snapshot.
    pub fn tracked_paths(&self) -> Vec<String> {
        self.state.paths()
    }

    /// Synchronizes one document, whatever that turns out to mean.
    pub async fn sync_document(&self, path: &str) -> SyncItemResult {
        let start = Instant::now();

        let mtime = match self.documents.stat(path).await {
            Ok(mtime) => mtime,
            Err(e) if e.is_not_found() => return self.handle_missing(path, start),
            Err(e) => return SyncItemResult::failed(path, &SyncError::Document(e), start),
        };

        let content = match self.documents.read(path).await {
            Ok(content) => content,
            Err(e) => return SyncItemResult::failed(path, &SyncError::Document(e), start),
        };

        let status = classify_document(frontmatter::remote_id(&content), self.state.get(path));
        match status {
            DocumentSyncStatus::Untracked => self.create(path, &content, start).await,
            DocumentSyncStatus::Tracked {
                remote_id,
                snapshot,
            } => {
                self.update(path, &content, mtime, remote_id, snapshot, start)
                    .await
            }
            DocumentSyncStatus::Inconsistent { reason } => {
                let err = SyncError::InconsistentState {
                    path: path.to_string(),
                    reason,
                };
                tracing::warn!(path = %path, error = %err, "inconsistent document state");
                SyncItemResult::failed(path, &err, start)
            }
        }
    }

    /// The document is gone: clear tracking if any, never touch the remote.
    fn handle_missing(&self, path: &str, start: Instant) -> SyncItemResult {
        if self.state.clear(path) {
            if let Err(e) = self.state.flush() {
                tracing::warn!(path = %path, error = %e, "state flush after untrack failed");
            }
            tracing::info!(path = %path, "document removed; tracking cleared");
            SyncItemResult::done(path, SyncAction::Deleted, None, start)
        } else {
            SyncItemResult::done(path, SyncAction::Skipped, None, start)
        }
    }

    async fn create(&self, path: &str, content: &str, start: Instant) -> SyncItemResult {
        let folder = parent_folder(path);
        let Some(type_id) = self.config.resolve_type_id(folder) else {
            let err = SyncError::UnmappedFolder {
                folder: folder.to_string(),
            };
            return SyncItemResult::failed(path, &err, start);
        };

        let parsed = frontmatter::parse(content);
        let tags = parsed
            .frontmatter
            .as_ref()
            .map(|fm| fm.tags())
            .unwrap_or_default();
        let op = SyncOperation::Create {
            type_id: type_id.to_string(),
            name: frontmatter::title_or_stem(content, path),
            body: parsed.body.to_string(),
            tags: self.config.resolve_tags(&tags),
            source_path: path.to_string(),
        };

        let mut rollback = Vec::new();
        match self.executor.execute_create(&op, &mut rollback).await {
            Ok(record) => {
                SyncItemResult::done(path, SyncAction::Created, Some(record.id), start)
            }
            Err(e) => {
                self.executor.rollback_operations(&mut rollback).await;
                SyncItemResult::failed(path, &e, start)
            }
        }
    }

    async fn update(
        &self,
        path: &str,
        content: &str,
        mtime: DateTime<Utc>,
        remote_id: String,
        snapshot: SyncSnapshot,
        start: Instant,
    ) -> SyncItemResult {
        let record = match self.remote.get_record(&self.config.container_id, &remote_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let err = SyncError::InconsistentState {
                    path: path.to_string(),
                    reason: format!("linked remote record {remote_id} no longer exists"),
                };
                return SyncItemResult::failed(path, &err, start);
            }
            Err(e) => return SyncItemResult::failed(path, &e, start),
        };

        let mut verdict = conflict::detect_conflict(mtime, record.updated_at, Some(&snapshot));
        let local_body = frontmatter::parse(content).body;

        if verdict.has_conflict {
            verdict.content_diff =
                Some(conflict::generate_content_diff(local_body, &record.body));
            tracing::warn!(path = %path, reason = %verdict.reason, "conflict detected");
            let mut result =
                SyncItemResult::done(path, SyncAction::Conflict, Some(remote_id), start);
            result.conflict = Some(verdict);
            return result;
        }

        match verdict.strategy {
            ResolutionStrategy::LocalWins if verdict.changed_sides.is_empty() => {
                SyncItemResult::done(path, SyncAction::Skipped, Some(remote_id), start)
            }
            ResolutionStrategy::LocalWins => {
                let op = SyncOperation::Update {
                    remote_id: remote_id.clone(),
                    name: frontmatter::title_or_stem(content, path),
                    body: local_body.to_string(),
                    source_path: path.to_string(),
                };
                let mut rollback = Vec::new();
                match self.executor.execute_update(&op, &mut rollback).await {
                    Ok(_) => {
                        SyncItemResult::done(path, SyncAction::Updated, Some(remote_id), start)
                    }
                    Err(e) => {
                        self.executor.rollback_operations(&mut rollback).await;
                        SyncItemResult::failed(path, &e, start)
                    }
                }
            }
            ResolutionStrategy::RemoteWins => {
                match self.pull(path, content, &record).await {
                    Ok(()) => {
                        SyncItemResult::done(path, SyncAction::Pulled, Some(remote_id), start)
                    }
                    Err(e) => SyncItemResult::failed(path, &e, start),
                }
            }
            // detect_conflict only yields ManualMerge with has_conflict set.
            ResolutionStrategy::ManualMerge => {
                SyncItemResult::done(path, SyncAction::Skipped, Some(remote_id), start)
            }
        }
    }

    /// Pulls the remote body into the local document and refreshes the
    /// snapshot. On a later step's failure the original content is
    /// restored best-effort.
    async fn pull(&self, path: &str, content: &str, record: &RemoteRecord) -> SyncResult<()> {
        let now = Utc::now();
        let pulled = frontmatter::upsert_fields(
            &frontmatter::replace_body(content, &record.body),
            &[(SYNCED_AT_KEY, &now.to_rfc3339())],
        );
        self.documents.write(path, &pulled).await?;

        let mut rollback = vec![RollbackEntry::FrontmatterRevert {
            path: path.to_string(),
            original_content: content.to_string(),
        }];

        let modified = match self.documents.stat(path).await {
            Ok(m) => m,
            Err(e) => {
                self.executor.rollback_operations(&mut rollback).await;
                return Err(SyncError::Document(e));
            }
        };
        self.state.set(
            path,
            SyncSnapshot {
                last_synced_at: now,
                local_modified_at: modified,
                remote_updated_at: record.updated_at,
                remote_id: Some(record.id.clone()),
            },
        );
        if let Err(e) = self.state.flush() {
            self.executor.rollback_operations(&mut rollback).await;
            return Err(SyncError::State(e));
        }
        tracing::info!(path = %path, record = %record.id, "remote content pulled");
        Ok(())
    }
}

fn parent_folder(path: &str) -> &str {
    path.rsplit_once('/').map(|(folder, _)| folder).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteClient;
    use chrono::TimeZone;
    use marksync_core::MemoryDocumentStore;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn dispatcher() -> (
        Arc<MockRemoteClient>,
        Arc<MemoryDocumentStore>,
        Arc<SyncStateStore>,
        SyncDispatcher<MockRemoteClient, MemoryDocumentStore>,
    ) {
        let remote = Arc::new(MockRemoteClient::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let state = Arc::new(SyncStateStore::in_memory());
        let config = ContainerConfig::new("db-1")
            .with_folder("", "type-root")
            .with_folder("notes", "type-note")
            .with_tag("work", "tag-work");
        let dispatcher = SyncDispatcher::new(
            Arc::clone(&remote),
            Arc::clone(&documents),
            Arc::clone(&state),
            config,
        );
        (remote, documents, state, dispatcher)
    }

    fn tracked_snapshot(remote_id: &str, at: DateTime<Utc>) -> SyncSnapshot {
        SyncSnapshot {
            last_synced_at: at,
            local_modified_at: at,
            remote_updated_at: at,
            remote_id: Some(remote_id.to_string()),
        }
    }

    fn seed_tracked(
        remote: &MockRemoteClient,
        documents: &MemoryDocumentStore,
        state: &SyncStateStore,
        path: &str,
        body: &str,
        at: DateTime<Utc>,
    ) {
        remote.seed_record(RemoteRecord {
            id: "rec-1".into(),
            name: "Note".into(),
            body: "remote body\n".into(),
            updated_at: at,
        });
        documents.insert_with_mtime(
            path,
            format!("---\nmarksync-id: rec-1\n---\n{body}"),
            at,
        );
        state.set(path, tracked_snapshot("rec-1", at));
    }

    #[test]
    fn classification_matrix() {
        let snap = tracked_snapshot("rec-1", base_time());

        assert_eq!(classify_document(None, None), DocumentSyncStatus::Untracked);
        assert!(matches!(
            classify_document(Some("rec-1".into()), Some(snap.clone())),
            DocumentSyncStatus::Tracked { .. }
        ));
        assert!(matches!(
            classify_document(Some("rec-1".into()), None),
            DocumentSyncStatus::Inconsistent { .. }
        ));
        assert!(matches!(
            classify_document(None, Some(snap.clone())),
            DocumentSyncStatus::Inconsistent { .. }
        ));
        assert!(matches!(
            classify_document(Some("rec-2".into()), Some(snap)),
            DocumentSyncStatus::Inconsistent { .. }
        ));
    }

    #[tokio::test]
    async fn untracked_document_is_created() {
        let (remote, documents, state, dispatcher) = dispatcher();
        documents.insert("notes/a.md", "---\ntags: [work, misc]\n---\nbody\n");

        let result = dispatcher.sync_document("notes/a.md").await;

        assert_eq!(result.action, SyncAction::Created);
        assert_eq!(result.remote_id.as_deref(), Some("rec-1"));
        assert!(state.get("notes/a.md").is_some());
        assert_eq!(remote.record("rec-1").unwrap().name, "a");
    }

    #[tokio::test]
    async fn unmapped_folder_fails_without_retry() {
        let remote = Arc::new(MockRemoteClient::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let state = Arc::new(SyncStateStore::in_memory());
        let dispatcher = SyncDispatcher::new(
            Arc::clone(&remote),
            Arc::clone(&documents),
            Arc::clone(&state),
            ContainerConfig::new("db-1").with_folder("notes", "type-note"),
        );
        documents.insert("elsewhere/a.md", "body\n");

        let result = dispatcher.sync_document("elsewhere/a.md").await;
        assert_eq!(result.action, SyncAction::Failed);
        assert!(!result.retryable);
        assert_eq!(remote.record_count(), 0);
    }

    #[tokio::test]
    async fn local_change_pushes_update() {
        let (remote, documents, state, dispatcher) = dispatcher();
        let at = base_time();
        seed_tracked(&remote, &documents, &state, "notes/a.md", "local body\n", at);
        // Local moved well past tolerance; remote unchanged.
        documents.set_modified("notes/a.md", at + chrono::Duration::minutes(10));

        let result = dispatcher.sync_document("notes/a.md").await;

        assert_eq!(result.action, SyncAction::Updated);
        assert_eq!(remote.record("rec-1").unwrap().body, "local body\n");
        let snap = state.get("notes/a.md").unwrap();
        assert_eq!(snap.remote_id.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn remote_change_pulls_content() {
        let (remote, documents, state, dispatcher) = dispatcher();
        let at = base_time();
        seed_tracked(&remote, &documents, &state, "notes/a.md", "local body\n", at);
        remote.seed_record(RemoteRecord {
            id: "rec-1".into(),
            name: "Note".into(),
            body: "fresher remote body\n".into(),
            updated_at: at + chrono::Duration::minutes(10),
        });

        let result = dispatcher.sync_document("notes/a.md").await;

        assert_eq!(result.action, SyncAction::Pulled);
        let content = documents.content("notes/a.md").unwrap();
        assert!(content.ends_with("fresher remote body\n"));
        assert!(content.contains("marksync-id: rec-1"));
        assert_eq!(
            state.get("notes/a.md").unwrap().remote_updated_at,
            at + chrono::Duration::minutes(10)
        );
    }

    #[tokio::test]
    async fn unchanged_document_is_skipped() {
        let (remote, documents, state, dispatcher) = dispatcher();
        seed_tracked(&remote, &documents, &state, "notes/a.md", "b\n", base_time());

        let result = dispatcher.sync_document("notes/a.md").await;
        assert_eq!(result.action, SyncAction::Skipped);
    }

    #[tokio::test]
    async fn both_sides_changed_is_a_conflict() {
        let (remote, documents, state, dispatcher) = dispatcher();
        let at = base_time();
        seed_tracked(&remote, &documents, &state, "notes/a.md", "local body\n", at);
        documents.set_modified("notes/a.md", at + chrono::Duration::minutes(10));
        remote.seed_record(RemoteRecord {
            id: "rec-1".into(),
            name: "Note".into(),
            body: "remote body\n".into(),
            updated_at: at + chrono::Duration::minutes(10),
        });

        let result = dispatcher.sync_document("notes/a.md").await;

        assert_eq!(result.action, SyncAction::Conflict);
        let verdict = result.conflict.unwrap();
        assert!(verdict.has_conflict);
        let diff = verdict.content_diff.unwrap();
        assert!(diff.starts_with("--- remote\n+++ local\n"));
        assert!(diff.contains("+local body"));
        assert!(diff.contains("-remote body"));
        // Neither side was touched.
        assert_eq!(remote.record("rec-1").unwrap().body, "remote body\n");
    }

    #[tokio::test]
    async fn inconsistent_state_is_not_retryable() {
        let (_remote, documents, _state, dispatcher) = dispatcher();
        documents.insert("notes/a.md", "---\nmarksync-id: rec-1\n---\nb\n");
        // No snapshot for the id.
        let result = dispatcher.sync_document("notes/a.md").await;
        assert_eq!(result.action, SyncAction::Failed);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn missing_remote_record_is_inconsistent() {
        let (remote, documents, state, dispatcher) = dispatcher();
        let at = base_time();
        seed_tracked(&remote, &documents, &state, "notes/a.md", "b\n", at);
        remote.delete_record("db-1", "rec-1").await.unwrap();

        let result = dispatcher.sync_document("notes/a.md").await;
        assert_eq!(result.action, SyncAction::Failed);
        assert!(!result.retryable);
        assert!(result.error.unwrap().contains("no longer exists"));
    }

    #[tokio::test]
    async fn vanished_document_clears_tracking() {
        let (_remote, _documents, state, dispatcher) = dispatcher();
        state.set("notes/gone.md", tracked_snapshot("rec-1", base_time()));

        let result = dispatcher.sync_document("notes/gone.md").await;
        assert_eq!(result.action, SyncAction::Deleted);
        assert!(state.get("notes/gone.md").is_none());

        // A second pass has nothing to clear.
        let result = dispatcher.sync_document("notes/gone.md").await;
        assert_eq!(result.action, SyncAction::Skipped);
    }

    #[tokio::test]
    async fn create_failure_rolls_back() {
        let (remote, documents, state, dispatcher) = dispatcher();
        documents.insert("notes/a.md", "body\n");
        remote.fail_all_creates("remote down");

        let result = dispatcher.sync_document("notes/a.md").await;
        assert_eq!(result.action, SyncAction::Failed);
        assert!(result.retryable);
        assert_eq!(documents.content("notes/a.md").unwrap(), "body\n");
        assert!(state.get("notes/a.md").is_none());
    }
}
