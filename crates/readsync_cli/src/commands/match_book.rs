//! Match command implementation.

use super::RemoteOptions;
use readsync_engine::{
    BookMatcher, BookMetadata, JsonFileLinkageStore, LinkageStore, RemoteApi, SyncLinkage,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs the match command.
///
/// Without `link` only the candidate is shown and the library is left
/// untouched.
pub async fn run(
    remote: &RemoteOptions,
    title: String,
    author: Option<String>,
    isbn: Option<String>,
    link: bool,
    store: Option<(PathBuf, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = store
        .as_ref()
        .map(|(_, book)| book.clone())
        .unwrap_or_else(|| "cli".to_string());
    let mut meta = BookMetadata::new(key, title);
    if let Some(author) = author {
        meta = meta.with_author(author);
    }
    if let Some(isbn) = isbn {
        meta = meta.with_isbn(isbn);
    }

    let api: Arc<dyn RemoteApi> = Arc::new(remote.client()?);
    let matcher = BookMatcher::new(api);

    let Some(candidate) = matcher.find_candidate(&meta).await? else {
        println!("No acceptable match for \"{}\"", meta.title);
        return Ok(());
    };
    println!(
        "Matched book {} \"{}\" ({:?}, score {:.1})",
        candidate.book_id, candidate.title, candidate.method, candidate.score
    );

    if !link && store.is_none() {
        return Ok(());
    }
    let link_id = matcher.ensure_in_library(candidate.book_id).await?;
    println!("Library entry: {}", link_id);

    if let Some((path, book)) = store {
        let store = JsonFileLinkageStore::open(&path)?;
        store.save(&book, &SyncLinkage::linked(link_id))?;
        println!("Linkage for {} saved to {}", book, store.path().display());
    }
    Ok(())
}
