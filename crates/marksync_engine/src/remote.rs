//! Remote record store abstraction.
//!
//! The engine talks to the remote store through [`RemoteClient`], which
//! keeps transport details out of the core. A mock implementation with
//! scripted failures lives here as well, mirroring how the real client is
//! exercised in tests.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// A record as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Server-assigned record identifier.
    pub id: String,
    /// Record name.
    pub name: String,
    /// Record body text.
    pub body: String,
    /// Server-reported last update time.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Destination type within the container.
    pub type_id: String,
    /// Record name.
    pub name: String,
    /// Record body text.
    pub body: String,
    /// Tag identifiers (or unresolved tag names, passed through).
    pub tags: Vec<String>,
}

/// Payload for updating a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New record name.
    pub name: String,
    /// New record body text.
    pub body: String,
}

/// Client for the remote record store.
///
/// Implementations classify their failures as retryable (rate limits,
/// server errors, transport hiccups) or fatal (the rest); the queue layer
/// consumes that classification for its retry decisions.
pub trait RemoteClient: Send + Sync {
    /// Creates a record in a container.
    fn create_record(
        &self,
        container_id: &str,
        record: &NewRecord,
    ) -> impl Future<Output = SyncResult<RemoteRecord>> + Send;

    /// Updates an existing record.
    fn update_record(
        &self,
        container_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> impl Future<Output = SyncResult<RemoteRecord>> + Send;

    /// Deletes a record.
    fn delete_record(
        &self,
        container_id: &str,
        record_id: &str,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Fetches a record. A missing record maps to `None`, not an error.
    fn get_record(
        &self,
        container_id: &str,
        record_id: &str,
    ) -> impl Future<Output = SyncResult<Option<RemoteRecord>>> + Send;
}

/// A mock remote store for testing.
///
/// Records live in an in-memory map; failures can be scripted per call
/// number or switched on wholesale.
#[derive(Debug, Default)]
pub struct MockRemoteClient {
    records: Mutex<HashMap<String, RemoteRecord>>,
    next_id: AtomicU64,
    create_calls: AtomicU64,
    create_failures: Mutex<HashMap<u64, SyncError>>,
    fail_all_creates: Mutex<Option<String>>,
    fail_all_updates: Mutex<Option<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockRemoteClient {
    /// Creates an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a record.
    pub fn seed_record(&self, record: RemoteRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    /// Returns a record's current server-side state.
    pub fn record(&self, id: &str) -> Option<RemoteRecord> {
        self.records.lock().get(id).cloned()
    }

    /// Number of records currently stored.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Ids passed to `delete_record`, in call order.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Scripts a failure for the nth `create_record` call (1-based).
    pub fn fail_create_call(&self, call: u64, error: SyncError) {
        self.create_failures.lock().insert(call, error);
    }

    /// Makes every `create_record` call fail with a retryable error.
    pub fn fail_all_creates(&self, message: impl Into<String>) {
        *self.fail_all_creates.lock() = Some(message.into());
    }

    /// Makes every `update_record` call fail with a retryable error.
    pub fn fail_all_updates(&self, message: impl Into<String>) {
        *self.fail_all_updates.lock() = Some(message.into());
    }

    /// Stops failing create calls.
    pub fn heal(&self) {
        *self.fail_all_creates.lock() = None;
        *self.fail_all_updates.lock() = None;
        self.create_failures.lock().clear();
    }
}

impl RemoteClient for MockRemoteClient {
    async fn create_record(
        &self,
        _container_id: &str,
        record: &NewRecord,
    ) -> SyncResult<RemoteRecord> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.create_failures.lock().remove(&call) {
            return Err(err);
        }
        if let Some(message) = self.fail_all_creates.lock().clone() {
            return Err(SyncError::remote_retryable(message));
        }

        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = RemoteRecord {
            id: id.clone(),
            name: record.name.clone(),
            body: record.body.clone(),
            updated_at: Utc::now(),
        };
        self.records.lock().insert(id, created.clone());
        Ok(created)
    }

    async fn update_record(
        &self,
        _container_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> SyncResult<RemoteRecord> {
        if let Some(message) = self.fail_all_updates.lock().clone() {
            return Err(SyncError::remote_retryable(message));
        }

        let mut records = self.records.lock();
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| SyncError::remote_fatal(format!("record not found: {record_id}")))?;
        record.name = patch.name.clone();
        record.body = patch.body.clone();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_record(&self, _container_id: &str, record_id: &str) -> SyncResult<()> {
        self.deleted.lock().push(record_id.to_string());
        self.records.lock().remove(record_id);
        Ok(())
    }

    async fn get_record(
        &self,
        _container_id: &str,
        record_id: &str,
    ) -> SyncResult<Option<RemoteRecord>> {
        Ok(self.records.lock().get(record_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_create_and_get() {
        let client = MockRemoteClient::new();
        let record = client
            .create_record(
                "db-1",
                &NewRecord {
                    type_id: "type-a".into(),
                    name: "Note".into(),
                    body: "body".into(),
                    tags: vec![],
                },
            )
            .await
            .unwrap();

        assert_eq!(record.id, "rec-1");
        let fetched = client.get_record("db-1", "rec-1").await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(client.get_record("db-1", "rec-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mock_scripted_failure() {
        let client = MockRemoteClient::new();
        client.fail_create_call(2, SyncError::remote_retryable("boom"));

        let record = NewRecord {
            type_id: "t".into(),
            name: "n".into(),
            body: "b".into(),
            tags: vec![],
        };
        assert!(client.create_record("db", &record).await.is_ok());
        assert!(client.create_record("db", &record).await.is_err());
        assert!(client.create_record("db", &record).await.is_ok());
    }

    #[tokio::test]
    async fn mock_update_missing_record_is_fatal() {
        let client = MockRemoteClient::new();
        let err = client
            .update_record(
                "db",
                "rec-404",
                &RecordPatch {
                    name: "n".into(),
                    body: "b".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn mock_tracks_deletes() {
        let client = MockRemoteClient::new();
        client.delete_record("db", "rec-1").await.unwrap();
        assert_eq!(client.deleted_ids(), vec!["rec-1".to_string()]);
    }
}
