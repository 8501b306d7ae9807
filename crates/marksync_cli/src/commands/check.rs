//! Offline tracking-state check.

use marksync_core::{frontmatter, SyncStateStore};
use marksync_engine::{classify_document, DocumentSyncStatus};
use std::collections::BTreeMap;
use std::path::Path;

/// Classifies every document in the vault against the sync state, without
/// touching the remote store.
pub fn run(vault: &Path, state_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let state = match SyncStateStore::peek(state_path) {
        Ok(state) => state,
        Err(e) if matches!(&e, marksync_core::CoreError::Io(io) if io.kind() == std::io::ErrorKind::NotFound) => {
            BTreeMap::new()
        }
        Err(e) => return Err(e.into()),
    };

    let mut untracked = 0usize;
    let mut tracked = 0usize;
    let mut inconsistent = 0usize;

    for path in super::collect_markdown(vault)? {
        let content = std::fs::read_to_string(vault.join(&path))?;
        let status = classify_document(
            frontmatter::remote_id(&content),
            state.get(&path).cloned(),
        );
        match status {
            DocumentSyncStatus::Untracked => {
                untracked += 1;
                println!("untracked     {path}");
            }
            DocumentSyncStatus::Tracked { remote_id, .. } => {
                tracked += 1;
                println!("tracked       {path} -> {remote_id}");
            }
            DocumentSyncStatus::Inconsistent { reason } => {
                inconsistent += 1;
                println!("INCONSISTENT  {path}: {reason}");
            }
        }
    }

    // Snapshots whose documents are gone show up as stale tracking.
    let mut stale = 0usize;
    for path in state.keys() {
        if !vault.join(path).exists() {
            stale += 1;
            println!("stale         {path} (document missing; sync will untrack)");
        }
    }

    println!(
        "\n{tracked} tracked, {untracked} untracked, {inconsistent} inconsistent, {stale} stale"
    );
    if inconsistent > 0 {
        return Err(format!("{inconsistent} documents have inconsistent sync state").into());
    }
    Ok(())
}
