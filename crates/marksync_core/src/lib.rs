//! # MarkSync Core
//!
//! Local-side building blocks for MarkSync:
//! - Document store abstraction with filesystem and in-memory backends
//! - Frontmatter codec for the structured metadata block
//! - Sync state store (last-synced snapshots, JSON persistence, file lock)
//!
//! The sync engine itself lives in `marksync_engine`; this crate knows
//! nothing about remote records or queues.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
pub mod frontmatter;
mod state_store;

pub use document::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use error::{CoreError, CoreResult};
pub use state_store::{SyncSnapshot, SyncStateStore, STATE_FILE_VERSION};
