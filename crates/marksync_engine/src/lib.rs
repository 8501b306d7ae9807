//! # MarkSync Engine
//!
//! The sync engine keeping a local markdown document tree and a remote
//! record store eventually consistent without silently clobbering either
//! side.
//!
//! This crate provides:
//! - Conflict detection (three-way timestamp comparison with tolerance)
//! - Unified content diffs and marker-based manual-merge framing
//! - Rollback-safe create/update execution (compensation stack)
//! - Per-document dispatch with explicit tracking classification
//! - A debounced, deduplicated, bounded-concurrency retry queue
//! - Remote client trait with HTTP and mock implementations
//!
//! ## Key invariants
//!
//! - A document with changes on both sides is surfaced for a human, never
//!   merged automatically
//! - Every attempted mutation is fully applied, fully reverted, or
//!   explicitly reported as failed
//! - No two dispatches for the same document are ever in flight at once
//! - Rollback never raises; step failures are logged and swallowed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod dispatcher;
mod error;
mod events;
mod executor;
mod http;
mod queue;
mod remote;

pub use config::{BatchOptions, ContainerConfig, FolderMapping, QueueConfig};
pub use conflict::{
    detect_conflict, generate_content_diff, resolve_conflict, ConflictResult, ResolutionStrategy,
    ResolvedConflict, Side, TIMESTAMP_TOLERANCE_MS,
};
pub use dispatcher::{
    classify_document, DocumentSyncStatus, SyncAction, SyncDispatcher, SyncItemResult,
};
pub use error::{SyncError, SyncResult};
pub use events::{QueueEvent, QueueObserver, TracingObserver};
pub use executor::{BatchError, BatchResult, RollbackEntry, SyncExecutor, SyncOperation};
pub use http::HttpRemoteClient;
pub use queue::{ChangeEvent, ChangeKind, QueueItem, QueueStats, SyncQueue};
pub use remote::{MockRemoteClient, NewRecord, RecordPatch, RemoteClient, RemoteRecord};
