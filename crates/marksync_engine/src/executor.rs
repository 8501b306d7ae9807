//! Rollback-safe execution of sync operations.
//!
//! Every create/update is a sequence of side effects (remote call,
//! frontmatter rewrite, snapshot write) that must either all land or be
//! compensated. Each completed step pushes an undo entry onto a rollback
//! stack owned by the caller; unwinding pops LIFO and never raises.

use crate::config::BatchOptions;
use crate::error::{SyncError, SyncResult};
use crate::remote::{NewRecord, RecordPatch, RemoteClient, RemoteRecord};
use chrono::Utc;
use marksync_core::frontmatter::{self, REMOTE_ID_KEY, SYNCED_AT_KEY};
use marksync_core::{DocumentStore, SyncSnapshot, SyncStateStore};
use std::sync::Arc;

/// One sync operation, constructed per dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOperation {
    /// Create a remote record for an untracked document.
    Create {
        /// Destination type id.
        type_id: String,
        /// Record name.
        name: String,
        /// Record body.
        body: String,
        /// Resolved tag ids (unmapped names pass through).
        tags: Vec<String>,
        /// The local document this record comes from.
        source_path: String,
    },
    /// Push a tracked document into its existing remote record.
    Update {
        /// The linked remote record id.
        remote_id: String,
        /// Record name.
        name: String,
        /// Record body.
        body: String,
        /// The local document this record comes from.
        source_path: String,
    },
}

impl SyncOperation {
    /// The local document this operation acts on.
    pub fn source_path(&self) -> &str {
        match self {
            SyncOperation::Create { source_path, .. } => source_path,
            SyncOperation::Update { source_path, .. } => source_path,
        }
    }
}

/// A compensating action recorded after a completed step.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackEntry {
    /// Rewrite the document back to its pre-operation content.
    FrontmatterRevert {
        /// Document path.
        path: String,
        /// Content before the rewrite.
        original_content: String,
    },
    /// Delete a record that was created remotely.
    RemoteCreateUndo {
        /// The created record's id.
        remote_id: String,
    },
    /// Remove the snapshot written for a document.
    StateClear {
        /// Document path.
        path: String,
    },
}

/// One failed operation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchError {
    /// The document whose operation failed.
    pub path: String,
    /// The failure message.
    pub message: String,
}

/// Outcome of an [`SyncExecutor::execute_batch`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Records created.
    pub created: usize,
    /// Records updated.
    pub updated: usize,
    /// Creates refused because the document was already linked.
    pub conflicts: usize,
    /// Operations never attempted because the batch aborted early.
    pub skipped: usize,
    /// Per-item failures, in encounter order.
    pub errors: Vec<BatchError>,
    /// The records returned by successful creates.
    pub created_records: Vec<RemoteRecord>,
    /// The records returned by successful updates.
    pub updated_records: Vec<RemoteRecord>,
}

impl BatchResult {
    /// Returns true if every attempted operation succeeded.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Executes sync operations with compensating rollback.
pub struct SyncExecutor<C, D> {
    remote: Arc<C>,
    documents: Arc<D>,
    state: Arc<SyncStateStore>,
    container_id: String,
}

impl<C: RemoteClient, D: DocumentStore> SyncExecutor<C, D> {
    /// Creates an executor bound to one remote container.
    pub fn new(
        remote: Arc<C>,
        documents: Arc<D>,
        state: Arc<SyncStateStore>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            documents,
            state,
            container_id: container_id.into(),
        }
    }

    /// Creates a remote record for a document and links the two.
    ///
    /// Steps, each pushing its undo entry only after it succeeds:
    /// remote create, frontmatter rewrite (remote id + sync timestamp),
    /// snapshot write. On failure the error is returned with the stack
    /// holding entries for completed steps only; the caller decides
    /// whether to unwind.
    pub async fn execute_create(
        &self,
        op: &SyncOperation,
        rollback: &mut Vec<RollbackEntry>,
    ) -> SyncResult<RemoteRecord> {
        let SyncOperation::Create {
            type_id,
            name,
            body,
            tags,
            source_path,
        } = op
        else {
            return Err(SyncError::remote_fatal("execute_create needs a create operation"));
        };

        let record = self
            .remote
            .create_record(
                &self.container_id,
                &NewRecord {
                    type_id: type_id.clone(),
                    name: name.clone(),
                    body: body.clone(),
                    tags: tags.clone(),
                },
            )
            .await?;
        rollback.push(RollbackEntry::RemoteCreateUndo {
            remote_id: record.id.clone(),
        });
        tracing::debug!(path = %source_path, record = %record.id, "remote record created");

        let now = Utc::now();
        let original = self.documents.read(source_path).await?;
        let updated = frontmatter::upsert_fields(
            &original,
            &[(REMOTE_ID_KEY, &record.id), (SYNCED_AT_KEY, &now.to_rfc3339())],
        );
        self.documents.write(source_path, &updated).await?;
        rollback.push(RollbackEntry::FrontmatterRevert {
            path: source_path.clone(),
            original_content: original,
        });

        self.write_snapshot(source_path, Some(record.id.clone()), record.updated_at, rollback)
            .await?;

        Ok(record)
    }

    /// Pushes a tracked document into its existing remote record.
    ///
    /// Same shape as a create minus the create-undo step.
    pub async fn execute_update(
        &self,
        op: &SyncOperation,
        rollback: &mut Vec<RollbackEntry>,
    ) -> SyncResult<RemoteRecord> {
        let SyncOperation::Update {
            remote_id,
            name,
            body,
            source_path,
        } = op
        else {
            return Err(SyncError::remote_fatal("execute_update needs an update operation"));
        };

        let record = self
            .remote
            .update_record(
                &self.container_id,
                remote_id,
                &RecordPatch {
                    name: name.clone(),
                    body: body.clone(),
                },
            )
            .await?;
        tracing::debug!(path = %source_path, record = %remote_id, "remote record updated");

        let now = Utc::now();
        let original = self.documents.read(source_path).await?;
        let updated =
            frontmatter::upsert_fields(&original, &[(SYNCED_AT_KEY, &now.to_rfc3339())]);
        self.documents.write(source_path, &updated).await?;
        rollback.push(RollbackEntry::FrontmatterRevert {
            path: source_path.clone(),
            original_content: original,
        });

        self.write_snapshot(source_path, Some(remote_id.clone()), record.updated_at, rollback)
            .await?;

        Ok(record)
    }

    /// Writes a fresh snapshot from the document's current mtime.
    async fn write_snapshot(
        &self,
        path: &str,
        remote_id: Option<String>,
        remote_updated_at: chrono::DateTime<Utc>,
        rollback: &mut Vec<RollbackEntry>,
    ) -> SyncResult<()> {
        let modified = self.documents.stat(path).await?;
        self.state.set(
            path,
            SyncSnapshot {
                last_synced_at: Utc::now(),
                local_modified_at: modified,
                remote_updated_at,
                remote_id,
            },
        );
        if let Err(e) = self.state.flush() {
            // Undo the in-memory write so the store and disk stay agreed.
            self.state.clear(path);
            return Err(SyncError::State(e));
        }
        rollback.push(RollbackEntry::StateClear { path: path.into() });
        Ok(())
    }

    /// Unwinds a rollback stack, LIFO.
    ///
    /// Rollback is a best-effort safety net: each step's failure is logged
    /// and swallowed so one bad step cannot prevent unwinding the rest.
    pub async fn rollback_operations(&self, rollback: &mut Vec<RollbackEntry>) {
        while let Some(entry) = rollback.pop() {
            match entry {
                RollbackEntry::FrontmatterRevert {
                    path,
                    original_content,
                } => {
                    if let Err(e) = self.documents.write(&path, &original_content).await {
                        tracing::warn!(path = %path, error = %e, "rollback: frontmatter revert failed");
                    }
                }
                RollbackEntry::RemoteCreateUndo { remote_id } => {
                    if let Err(e) = self
                        .remote
                        .delete_record(&self.container_id, &remote_id)
                        .await
                    {
                        tracing::warn!(record = %remote_id, error = %e, "rollback: remote delete failed");
                    }
                }
                RollbackEntry::StateClear { path } => {
                    self.state.clear(&path);
                    if let Err(e) = self.state.flush() {
                        tracing::warn!(path = %path, error = %e, "rollback: state flush failed");
                    }
                }
            }
        }
    }

    /// Runs a batch of operations: all creates first, then all updates.
    ///
    /// A create whose document already has a snapshot with a remote id is
    /// a conflict (someone else already linked it): counted and skipped without
    /// any remote call. Per-item failures are always recorded; with
    /// `stop_on_error` the batch aborts at the first failure (optionally
    /// unwinding everything completed so far), otherwise it carries on.
    pub async fn execute_batch(
        &self,
        operations: &[SyncOperation],
        options: &BatchOptions,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        let mut rollback = Vec::new();

        let ordered: Vec<&SyncOperation> = operations
            .iter()
            .filter(|op| matches!(op, SyncOperation::Create { .. }))
            .chain(
                operations
                    .iter()
                    .filter(|op| matches!(op, SyncOperation::Update { .. })),
            )
            .collect();

        for (index, op) in ordered.iter().enumerate() {
            let path = op.source_path();

            let outcome = match op {
                SyncOperation::Create { .. } => {
                    let already_linked = self
                        .state
                        .get(path)
                        .map(|snap| snap.remote_id.is_some())
                        .unwrap_or(false);
                    if already_linked {
                        tracing::warn!(path = %path, "create refused: document already linked");
                        result.conflicts += 1;
                        continue;
                    }
                    self.execute_create(op, &mut rollback).await.map(|record| {
                        result.created += 1;
                        result.created_records.push(record);
                    })
                }
                SyncOperation::Update { .. } => {
                    self.execute_update(op, &mut rollback).await.map(|record| {
                        result.updated += 1;
                        result.updated_records.push(record);
                    })
                }
            };

            if let Err(e) = outcome {
                tracing::warn!(path = %path, error = %e, "batch operation failed");
                result.errors.push(BatchError {
                    path: path.to_string(),
                    message: e.to_string(),
                });
                if options.stop_on_error {
                    result.skipped = ordered.len() - index - 1;
                    if options.rollback_on_error {
                        self.rollback_operations(&mut rollback).await;
                    }
                    return result;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteClient;
    use marksync_core::MemoryDocumentStore;

    fn executor() -> (
        Arc<MockRemoteClient>,
        Arc<MemoryDocumentStore>,
        Arc<SyncStateStore>,
        SyncExecutor<MockRemoteClient, MemoryDocumentStore>,
    ) {
        let remote = Arc::new(MockRemoteClient::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let state = Arc::new(SyncStateStore::in_memory());
        let exec = SyncExecutor::new(
            Arc::clone(&remote),
            Arc::clone(&documents),
            Arc::clone(&state),
            "db-1",
        );
        (remote, documents, state, exec)
    }

    fn create_op(path: &str) -> SyncOperation {
        SyncOperation::Create {
            type_id: "type-a".into(),
            name: "Note".into(),
            body: "body\n".into(),
            tags: vec!["tag-1".into()],
            source_path: path.into(),
        }
    }

    #[tokio::test]
    async fn create_links_document_and_writes_snapshot() {
        let (remote, documents, state, exec) = executor();
        documents.insert("notes/a.md", "# A\n");

        let mut rollback = Vec::new();
        let record = exec
            .execute_create(&create_op("notes/a.md"), &mut rollback)
            .await
            .unwrap();

        assert_eq!(record.id, "rec-1");
        assert_eq!(rollback.len(), 3);

        let content = documents.content("notes/a.md").unwrap();
        assert_eq!(
            marksync_core::frontmatter::remote_id(&content).as_deref(),
            Some("rec-1")
        );
        assert!(content.ends_with("# A\n"));

        let snapshot = state.get("notes/a.md").unwrap();
        assert_eq!(snapshot.remote_id.as_deref(), Some("rec-1"));
        assert_eq!(snapshot.remote_updated_at, record.updated_at);
        assert!(remote.record("rec-1").is_some());
    }

    #[tokio::test]
    async fn create_then_rollback_restores_everything() {
        let (remote, documents, state, exec) = executor();
        let original = "---\ntitle: A\n---\noriginal body\n";
        documents.insert("notes/a.md", original);

        let mut rollback = Vec::new();
        exec.execute_create(&create_op("notes/a.md"), &mut rollback)
            .await
            .unwrap();
        exec.rollback_operations(&mut rollback).await;

        assert!(rollback.is_empty());
        assert_eq!(documents.content("notes/a.md").unwrap(), original);
        assert!(state.get("notes/a.md").is_none());
        assert_eq!(remote.deleted_ids(), vec!["rec-1".to_string()]);
        assert_eq!(remote.record_count(), 0);
    }

    #[tokio::test]
    async fn failed_step_leaves_only_completed_entries() {
        let (remote, _documents, _state, exec) = executor();
        // The document is missing, so the frontmatter step fails right
        // after the remote create succeeded.
        let mut rollback = Vec::new();
        let err = exec
            .execute_create(&create_op("notes/ghost.md"), &mut rollback)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Document(_)));
        assert_eq!(rollback.len(), 1);
        assert!(matches!(
            rollback[0],
            RollbackEntry::RemoteCreateUndo { .. }
        ));

        exec.rollback_operations(&mut rollback).await;
        assert_eq!(remote.record_count(), 0);
    }

    #[tokio::test]
    async fn update_refreshes_snapshot_without_create_undo() {
        let (remote, documents, state, exec) = executor();
        remote.seed_record(RemoteRecord {
            id: "rec-9".into(),
            name: "Old".into(),
            body: "old".into(),
            updated_at: Utc::now(),
        });
        documents.insert("notes/b.md", "---\nmarksync-id: rec-9\n---\nnew body\n");

        let op = SyncOperation::Update {
            remote_id: "rec-9".into(),
            name: "New".into(),
            body: "new body\n".into(),
            source_path: "notes/b.md".into(),
        };
        let mut rollback = Vec::new();
        let record = exec.execute_update(&op, &mut rollback).await.unwrap();

        assert_eq!(record.name, "New");
        assert_eq!(rollback.len(), 2);
        assert!(!rollback
            .iter()
            .any(|e| matches!(e, RollbackEntry::RemoteCreateUndo { .. })));
        assert_eq!(
            state.get("notes/b.md").unwrap().remote_id.as_deref(),
            Some("rec-9")
        );
    }

    #[tokio::test]
    async fn batch_refuses_already_linked_creates() {
        let (remote, documents, state, exec) = executor();
        documents.insert("notes/a.md", "# A\n");
        state.set(
            "notes/a.md",
            SyncSnapshot {
                last_synced_at: Utc::now(),
                local_modified_at: Utc::now(),
                remote_updated_at: Utc::now(),
                remote_id: Some("rec-existing".into()),
            },
        );

        let result = exec
            .execute_batch(&[create_op("notes/a.md")], &BatchOptions::default())
            .await;

        assert_eq!(result.conflicts, 1);
        assert_eq!(result.created, 0);
        assert!(result.errors.is_empty());
        // No remote call was made at all.
        assert_eq!(remote.record_count(), 0);
    }

    #[tokio::test]
    async fn batch_stop_on_error_rolls_back_completed_work() {
        let (remote, documents, state, exec) = executor();
        for path in ["a.md", "b.md", "c.md"] {
            documents.insert(path, "body\n");
        }
        remote.fail_create_call(2, SyncError::remote_retryable("boom"));

        let options = BatchOptions {
            stop_on_error: true,
            rollback_on_error: true,
        };
        let ops = [create_op("a.md"), create_op("b.md"), create_op("c.md")];
        let result = exec.execute_batch(&ops, &options).await;

        assert_eq!(result.created, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.skipped, 1);
        // The first record was created, then deleted by the rollback.
        assert_eq!(remote.deleted_ids(), vec!["rec-1".to_string()]);
        assert_eq!(documents.content("a.md").unwrap(), "body\n");
        assert!(state.get("a.md").is_none());
    }

    #[tokio::test]
    async fn batch_best_effort_continues_past_failures() {
        let (remote, documents, _state, exec) = executor();
        for path in ["a.md", "b.md", "c.md"] {
            documents.insert(path, "body\n");
        }
        remote.fail_create_call(2, SyncError::remote_retryable("boom"));

        let ops = [create_op("a.md"), create_op("b.md"), create_op("c.md")];
        let result = exec.execute_batch(&ops, &BatchOptions::default()).await;

        assert_eq!(result.created, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "b.md");
        assert_eq!(result.skipped, 0);
        assert!(remote.deleted_ids().is_empty());
    }

    #[tokio::test]
    async fn batch_orders_creates_before_updates() {
        let (remote, documents, _state, exec) = executor();
        documents.insert("a.md", "body\n");
        documents.insert("b.md", "body\n");
        remote.seed_record(RemoteRecord {
            id: "rec-b".into(),
            name: "B".into(),
            body: "old".into(),
            updated_at: Utc::now(),
        });

        // Updates listed first must still run after the create.
        let ops = [
            SyncOperation::Update {
                remote_id: "rec-b".into(),
                name: "B2".into(),
                body: "new".into(),
                source_path: "b.md".into(),
            },
            create_op("a.md"),
        ];
        let result = exec.execute_batch(&ops, &BatchOptions::default()).await;

        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 1);
        assert!(result.is_success());
    }
}
