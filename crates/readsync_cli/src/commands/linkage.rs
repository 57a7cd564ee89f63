//! Linkage command implementation.

use readsync_engine::{JsonFileLinkageStore, LinkageStore};
use std::path::Path;

/// Runs the linkage command.
pub fn run(path: &Path, book: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No linkage file at {:?}", path).into());
    }
    let store = JsonFileLinkageStore::open(path)?;
    match store.load(book)? {
        Some(linkage) => println!("{}", serde_json::to_string_pretty(&linkage)?),
        None => println!("{} is not linked", book),
    }
    Ok(())
}
