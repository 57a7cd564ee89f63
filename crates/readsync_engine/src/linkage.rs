//! Persistent linkage between local books and remote library entries.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Remote state remembered for one local book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLinkage {
    /// Library entry id; `None` until matched.
    pub remote_book_link_id: Option<i64>,
    /// Active read session.
    pub read_session_id: Option<i64>,
    /// Edition progress is counted against.
    pub edition_id: Option<i64>,
    /// Start date of the active read session.
    pub read_started_at: Option<NaiveDate>,
    /// Page count of the remote edition.
    pub remote_total_pages: Option<u32>,
    /// Last successful progress write.
    pub last_pushed_at: Option<DateTime<Utc>>,
}

impl SyncLinkage {
    /// Creates a linkage for a library entry.
    pub fn linked(link_id: i64) -> Self {
        Self {
            remote_book_link_id: Some(link_id),
            ..Self::default()
        }
    }

    /// Returns true if the book is linked to a library entry.
    pub fn is_linked(&self) -> bool {
        self.remote_book_link_id.is_some()
    }

    /// Forgets every remote id.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forgets the read session and its start date.
    pub fn clear_session(&mut self) {
        self.read_session_id = None;
        self.read_started_at = None;
    }
}

/// Storage for linkages, keyed by local book identity.
pub trait LinkageStore: Send + Sync {
    /// Loads the linkage of a book.
    fn load(&self, book: &str) -> SyncResult<Option<SyncLinkage>>;

    /// Saves the linkage of a book.
    fn save(&self, book: &str, linkage: &SyncLinkage) -> SyncResult<()>;

    /// Removes the linkage of a book.
    fn clear(&self, book: &str) -> SyncResult<()>;
}

/// In-memory linkage store.
#[derive(Debug, Default)]
pub struct MemoryLinkageStore {
    linkages: RwLock<HashMap<String, SyncLinkage>>,
}

impl MemoryLinkageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored linkages.
    pub fn len(&self) -> usize {
        self.linkages.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.linkages.read().is_empty()
    }
}

impl LinkageStore for MemoryLinkageStore {
    fn load(&self, book: &str) -> SyncResult<Option<SyncLinkage>> {
        Ok(self.linkages.read().get(book).cloned())
    }

    fn save(&self, book: &str, linkage: &SyncLinkage) -> SyncResult<()> {
        self.linkages
            .write()
            .insert(book.to_string(), linkage.clone());
        Ok(())
    }

    fn clear(&self, book: &str) -> SyncResult<()> {
        self.linkages.write().remove(book);
        Ok(())
    }
}

/// Linkage store backed by a single JSON file.
///
/// The whole map is rewritten on every change via a temporary file and a
/// rename.
#[derive(Debug)]
pub struct JsonFileLinkageStore {
    path: PathBuf,
    linkages: RwLock<HashMap<String, SyncLinkage>>,
}

impl JsonFileLinkageStore {
    /// Opens the store, reading the file if it exists.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let linkages = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Store(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SyncError::Store(format!("{}: {}", path.display(), e))),
        };
        Ok(Self {
            path,
            linkages: RwLock::new(linkages),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, linkages: &HashMap<String, SyncLinkage>) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(linkages)
            .map_err(|e| SyncError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| SyncError::Store(format!("{}: {}", self.path.display(), e)))
    }
}

impl LinkageStore for JsonFileLinkageStore {
    fn load(&self, book: &str) -> SyncResult<Option<SyncLinkage>> {
        Ok(self.linkages.read().get(book).cloned())
    }

    fn save(&self, book: &str, linkage: &SyncLinkage) -> SyncResult<()> {
        let mut linkages = self.linkages.write();
        linkages.insert(book.to_string(), linkage.clone());
        self.persist(&linkages)
    }

    fn clear(&self, book: &str) -> SyncResult<()> {
        let mut linkages = self.linkages.write();
        if linkages.remove(book).is_some() {
            self.persist(&linkages)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> SyncLinkage {
        SyncLinkage {
            remote_book_link_id: Some(77),
            read_session_id: Some(31),
            edition_id: Some(5),
            read_started_at: NaiveDate::from_ymd_opt(2024, 3, 1),
            remote_total_pages: Some(412),
            last_pushed_at: None,
        }
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryLinkageStore::new();
        assert!(store.load("a").unwrap().is_none());

        store.save("a", &sample()).unwrap();
        assert_eq!(store.load("a").unwrap(), Some(sample()));
        assert_eq!(store.len(), 1);

        store.clear("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn reset_and_clear_session() {
        let mut linkage = sample();
        linkage.clear_session();
        assert!(linkage.is_linked());
        assert_eq!(linkage.read_session_id, None);
        assert_eq!(linkage.read_started_at, None);
        assert_eq!(linkage.edition_id, Some(5));

        linkage.reset();
        assert_eq!(linkage, SyncLinkage::default());
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("linkages.json");

        let store = JsonFileLinkageStore::open(&path).unwrap();
        store.save("book-1", &sample()).unwrap();
        store.save("book-2", &SyncLinkage::linked(9)).unwrap();
        store.clear("book-2").unwrap();
        drop(store);

        let reopened = JsonFileLinkageStore::open(&path).unwrap();
        assert_eq!(reopened.load("book-1").unwrap(), Some(sample()));
        assert!(reopened.load("book-2").unwrap().is_none());
    }

    #[test]
    fn json_store_uses_camel_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("linkages.json");
        let store = JsonFileLinkageStore::open(&path).unwrap();
        store.save("b", &SyncLinkage::linked(3)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["b"]["remoteBookLinkId"], 3);
    }

    #[test]
    fn corrupt_file_is_store_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("linkages.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            JsonFileLinkageStore::open(&path),
            Err(SyncError::Store(_))
        ));
    }
}
