//! Sync state inspection.

use marksync_core::SyncStateStore;
use std::path::Path;

/// Prints the persisted sync state.
///
/// Reads without taking the store lock so it works while an engine is
/// running against the same file.
pub fn run(state_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let state = match SyncStateStore::peek(state_path) {
        Ok(state) => state,
        Err(e) if matches!(&e, marksync_core::CoreError::Io(io) if io.kind() == std::io::ErrorKind::NotFound) =>
        {
            println!("no sync state at {}", state_path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if state.is_empty() {
        println!("no documents tracked");
        return Ok(());
    }

    println!("{} documents tracked\n", state.len());
    for (path, snapshot) in &state {
        let remote = snapshot.remote_id.as_deref().unwrap_or("-");
        println!(
            "{path}\n    remote: {remote}  last synced: {}",
            snapshot.last_synced_at.to_rfc3339()
        );
    }
    Ok(())
}
