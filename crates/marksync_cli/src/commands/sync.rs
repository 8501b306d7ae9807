//! One-shot vault synchronization.

use marksync_core::{FsDocumentStore, SyncStateStore};
use marksync_engine::{
    ContainerConfig, HttpRemoteClient, SyncAction, SyncDispatcher,
};
use std::path::Path;
use std::sync::Arc;

/// Runs a one-shot sync of every markdown document in the vault.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    vault: &Path,
    state_path: &Path,
    server: &str,
    container: &str,
    token: Option<String>,
    mappings: &[String],
    tags: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ContainerConfig::new(container);
    let folder_pairs = super::parse_pairs(mappings)?;
    if folder_pairs.is_empty() {
        return Err("at least one --map folder=type-id pairing is required".into());
    }
    for (folder, type_id) in folder_pairs {
        config = config.with_folder(folder, type_id);
    }
    for (name, tag_id) in super::parse_pairs(tags)? {
        config = config.with_tag(name, tag_id);
    }

    let mut client = HttpRemoteClient::new(server)?;
    if let Some(token) = token {
        client = client.with_token(token);
    }

    let documents = Arc::new(FsDocumentStore::new(vault));
    let state = Arc::new(SyncStateStore::open(state_path)?);
    let dispatcher = SyncDispatcher::new(Arc::new(client), documents, state, config);

    let mut paths = super::collect_markdown(vault)?;
    // Documents that vanished since the last sync still need their
    // tracking cleared, so dispatch every previously-tracked path too.
    for tracked in dispatcher.tracked_paths() {
        if !paths.contains(&tracked) {
            paths.push(tracked);
        }
    }

    tracing::info!(documents = paths.len(), container, "starting one-shot sync");

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut pulled = 0usize;
    let mut skipped = 0usize;
    let mut deleted = 0usize;
    let mut conflicts = 0usize;
    let mut failures = 0usize;

    for path in &paths {
        let result = dispatcher.sync_document(path).await;
        match result.action {
            SyncAction::Created => created += 1,
            SyncAction::Updated => updated += 1,
            SyncAction::Pulled => pulled += 1,
            SyncAction::Skipped => skipped += 1,
            SyncAction::Deleted => deleted += 1,
            SyncAction::Conflict => {
                conflicts += 1;
                println!("CONFLICT  {path}");
                if let Some(diff) = result.conflict.and_then(|c| c.content_diff) {
                    println!("{diff}");
                }
                continue;
            }
            SyncAction::Failed => {
                failures += 1;
                println!(
                    "FAILED    {path}: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
        }
        println!("{:<9} {path}", result.action.to_string());
    }

    println!(
        "\n{} documents: {created} created, {updated} updated, {pulled} pulled, \
         {skipped} skipped, {deleted} untracked, {conflicts} conflicts, {failures} failed",
        paths.len()
    );

    if failures > 0 {
        return Err(format!("{failures} documents failed to sync").into());
    }
    Ok(())
}
