//! Dedupe command implementation.

use super::RemoteOptions;
use readsync_engine::{plan_cleanup, JsonFileLinkageStore, LinkageStore, RemoteApi, SyncLinkage};
use std::path::PathBuf;
use tracing::info;

/// Runs the dedupe command.
///
/// Keeps the read session with the most progress. With a linkage file, the
/// book's linkage is pointed at the kept session.
pub async fn run(
    remote: &RemoteOptions,
    link_id: i64,
    dry_run: bool,
    store: Option<(PathBuf, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = remote.client()?;
    let sessions = client.list_read_sessions(link_id).await?;

    let Some((keep, delete)) = plan_cleanup(&sessions) else {
        println!("No read sessions for library entry {}", link_id);
        return Ok(());
    };
    println!("Keeping session {} (page {})", keep.id, keep.progress());
    if delete.is_empty() {
        println!("Nothing to delete");
        return Ok(());
    }

    if dry_run {
        for id in &delete {
            println!("Would delete session {}", id);
        }
        return Ok(());
    }

    for id in &delete {
        client.delete_read_session(*id).await?;
        info!(session_id = id, "deleted read session");
    }
    println!("Deleted {} session(s)", delete.len());

    if let Some((path, book)) = store {
        let store = JsonFileLinkageStore::open(&path)?;
        let mut linkage = store
            .load(&book)?
            .unwrap_or_else(|| SyncLinkage::linked(link_id));
        linkage.read_session_id = Some(keep.id);
        linkage.read_started_at = keep.started_at;
        if keep.edition_id.is_some() {
            linkage.edition_id = keep.edition_id;
        }
        store.save(&book, &linkage)?;
        println!("Linkage for {} updated", book);
    }
    Ok(())
}
