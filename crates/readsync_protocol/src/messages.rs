//! Typed request variables and response payloads.

use crate::error::{EmbeddedError, RemoteErrorCode};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A decoded `data` payload.
///
/// Mutations report failures inside their payload rather than in the
/// top-level `errors` list; `embedded_error` surfaces them so the client can
/// classify both the same way.
pub trait Payload: DeserializeOwned + Send {
    /// Returns the error embedded in this payload, if any.
    fn embedded_error(&self) -> Option<EmbeddedError> {
        None
    }
}

/// The owner of the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    /// User id.
    pub id: i64,
    /// Display name.
    pub username: String,
}

/// Payload of [`Operation::Me`](crate::Operation::Me).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeData {
    /// The remote returns the current user as a one-element list.
    pub me: Vec<RemoteUser>,
}

impl Payload for MeData {
    fn embedded_error(&self) -> Option<EmbeddedError> {
        if self.me.is_empty() {
            Some(EmbeddedError::new(
                RemoteErrorCode::Unauthorized,
                "credential does not identify a user",
            ))
        } else {
            None
        }
    }
}

/// Search hits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    /// Catalog book ids, best hit first.
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// Payload of [`Operation::SearchCatalog`](crate::Operation::SearchCatalog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchData {
    /// Search hits.
    pub search: SearchResults,
}

impl Payload for SearchData {}

/// An author reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Author name.
    pub name: String,
}

/// A contribution to a catalog book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Contributing author.
    pub author: Author,
}

/// An edition of a catalog book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEdition {
    /// Edition id.
    pub id: i64,
    /// ISBN-10.
    #[serde(default)]
    pub isbn_10: Option<String>,
    /// ISBN-13.
    #[serde(default)]
    pub isbn_13: Option<String>,
    /// Page count of this edition.
    #[serde(default)]
    pub pages: Option<u32>,
}

/// Catalog metadata for one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBook {
    /// Catalog book id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Default page count.
    #[serde(default)]
    pub pages: Option<u32>,
    /// Contributors.
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    /// Known editions.
    #[serde(default)]
    pub editions: Vec<CatalogEdition>,
}

impl CatalogBook {
    /// Returns the author names.
    pub fn author_names(&self) -> impl Iterator<Item = &str> {
        self.contributions.iter().map(|c| c.author.name.as_str())
    }

    /// Returns true if any edition carries this ISBN.
    ///
    /// Hyphens and spaces are ignored and the check digit is compared
    /// case-insensitively.
    pub fn has_isbn(&self, isbn: &str) -> bool {
        let wanted = normalize_isbn(isbn);
        if wanted.is_empty() {
            return false;
        }
        self.editions.iter().any(|e| {
            [&e.isbn_10, &e.isbn_13]
                .into_iter()
                .flatten()
                .any(|candidate| normalize_isbn(candidate) == wanted)
        })
    }
}

fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Payload of [`Operation::BooksByIds`](crate::Operation::BooksByIds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooksData {
    /// Matching books, in no particular order.
    pub books: Vec<CatalogBook>,
}

impl Payload for BooksData {}

/// A read session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSession {
    /// Session id.
    pub id: i64,
    /// Progress in remote pages.
    #[serde(default)]
    pub progress_pages: Option<u32>,
    /// Start date.
    #[serde(default)]
    pub started_at: Option<NaiveDate>,
    /// Finish date, `None` while the session is active.
    #[serde(default)]
    pub finished_at: Option<NaiveDate>,
    /// Edition the session counts pages against.
    #[serde(default)]
    pub edition_id: Option<i64>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReadSession {
    /// Returns the progress value used to rank duplicate sessions.
    pub fn progress(&self) -> u32 {
        self.progress_pages.unwrap_or(0)
    }
}

/// Edition attached to a library entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBookEdition {
    /// Edition id.
    pub id: i64,
    /// Page count.
    #[serde(default)]
    pub pages: Option<u32>,
}

/// Page count of the catalog book behind a library entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPages {
    /// Page count.
    #[serde(default)]
    pub pages: Option<u32>,
}

/// A library entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBook {
    /// Library entry id (the link id).
    pub id: i64,
    /// Catalog book id.
    pub book_id: i64,
    /// Reading status id.
    #[serde(default)]
    pub status_id: Option<i64>,
    /// Edition the user selected.
    #[serde(default)]
    pub edition: Option<UserBookEdition>,
    /// Catalog book page count.
    #[serde(default)]
    pub book: BookPages,
    /// Unfinished read sessions, newest first.
    #[serde(default)]
    pub user_book_reads: Vec<ReadSession>,
}

impl UserBook {
    /// Returns the page count the remote uses for progress: the selected
    /// edition's, falling back to the catalog book's.
    pub fn total_pages(&self) -> Option<u32> {
        self.edition
            .as_ref()
            .and_then(|e| e.pages)
            .or(self.book.pages)
            .filter(|&p| p > 0)
    }

    /// Returns the active read session, if any.
    pub fn active_session(&self) -> Option<&ReadSession> {
        self.user_book_reads
            .iter()
            .find(|r| r.finished_at.is_none())
    }
}

/// Payload of [`Operation::UserBook`](crate::Operation::UserBook).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBookData {
    /// The entry, or `None` when it no longer exists.
    pub user_books_by_pk: Option<UserBook>,
}

impl Payload for UserBookData {
    fn embedded_error(&self) -> Option<EmbeddedError> {
        match self.user_books_by_pk {
            Some(_) => None,
            None => Some(EmbeddedError::new(
                RemoteErrorCode::NotFound,
                "library entry not found",
            )),
        }
    }
}

/// A lightweight library entry reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Library entry id.
    pub id: i64,
    /// Catalog book id.
    pub book_id: i64,
    /// Reading status id.
    #[serde(default)]
    pub status_id: Option<i64>,
}

/// The current user's library, filtered by book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryOwner {
    /// Matching entries.
    #[serde(default)]
    pub user_books: Vec<LibraryEntry>,
}

/// Payload of [`Operation::FindLibraryEntry`](crate::Operation::FindLibraryEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryLookupData {
    /// One-element list holding the current user.
    pub me: Vec<LibraryOwner>,
}

impl LibraryLookupData {
    /// Returns the first matching entry.
    pub fn entry(&self) -> Option<&LibraryEntry> {
        self.me.iter().flat_map(|m| m.user_books.iter()).next()
    }
}

impl Payload for LibraryLookupData {}

/// Result object returned by create/update mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResult<T> {
    /// Error message, if the mutation was refused.
    #[serde(default)]
    pub error: Option<String>,
    /// Affected record.
    #[serde(flatten)]
    pub record: T,
}

/// Record part of a read-session mutation result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadRecord {
    /// The written session.
    #[serde(default)]
    pub user_book_read: Option<ReadSession>,
}

/// Record part of a library-entry mutation result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdRecord {
    /// The written entry id.
    #[serde(default)]
    pub id: Option<i64>,
}

/// Payload of the read-session mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadMutationData {
    /// Result of `insert_user_book_read`.
    #[serde(default)]
    pub insert_user_book_read: Option<MutationResult<ReadRecord>>,
    /// Result of `update_user_book_read`.
    #[serde(default)]
    pub update_user_book_read: Option<MutationResult<ReadRecord>>,
}

impl ReadMutationData {
    fn result(&self) -> Option<&MutationResult<ReadRecord>> {
        self.insert_user_book_read
            .as_ref()
            .or(self.update_user_book_read.as_ref())
    }

    /// Returns the written session.
    pub fn session(&self) -> Option<&ReadSession> {
        self.result().and_then(|r| r.record.user_book_read.as_ref())
    }
}

impl Payload for ReadMutationData {
    fn embedded_error(&self) -> Option<EmbeddedError> {
        let Some(result) = self.result() else {
            return Some(EmbeddedError::new(
                RemoteErrorCode::Other,
                "mutation returned no result",
            ));
        };
        if let Some(message) = &result.error {
            let mut error = EmbeddedError::from_message(message.clone());
            // A missing session on update means it was finished or deleted
            // remotely; a missing entry on insert means the link is gone.
            if self.update_user_book_read.is_some() && error.code == RemoteErrorCode::NotFound {
                error.code = RemoteErrorCode::SessionClosed;
            }
            return Some(error);
        }
        if result.record.user_book_read.is_none() {
            return Some(EmbeddedError::new(
                RemoteErrorCode::Other,
                "mutation returned no read session",
            ));
        }
        None
    }
}

/// Payload of the library-entry mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBookMutationData {
    /// Result of `insert_user_book`.
    #[serde(default)]
    pub insert_user_book: Option<MutationResult<IdRecord>>,
    /// Result of `update_user_book`.
    #[serde(default)]
    pub update_user_book: Option<MutationResult<IdRecord>>,
}

impl UserBookMutationData {
    fn result(&self) -> Option<&MutationResult<IdRecord>> {
        self.insert_user_book
            .as_ref()
            .or(self.update_user_book.as_ref())
    }

    /// Returns the written entry id.
    pub fn id(&self) -> Option<i64> {
        self.result().and_then(|r| r.record.id)
    }
}

impl Payload for UserBookMutationData {
    fn embedded_error(&self) -> Option<EmbeddedError> {
        match self.result() {
            Some(MutationResult {
                error: Some(message),
                ..
            }) => Some(EmbeddedError::from_message(message.clone())),
            Some(r) if r.record.id.is_none() => Some(EmbeddedError::new(
                RemoteErrorCode::NotFound,
                "library entry not found",
            )),
            Some(_) => None,
            None => Some(EmbeddedError::new(
                RemoteErrorCode::Other,
                "mutation returned no result",
            )),
        }
    }
}

/// Id of a deleted read session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletedRead {
    /// Deleted session id.
    #[serde(default)]
    pub id: Option<i64>,
}

/// Payload of [`Operation::DeleteReadSession`](crate::Operation::DeleteReadSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReadData {
    /// Deleted record.
    #[serde(default)]
    pub delete_user_book_read: Option<DeletedRead>,
}

impl Payload for DeleteReadData {}

/// Payload of [`Operation::ListReadSessions`](crate::Operation::ListReadSessions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSessionsData {
    /// Every session of the entry.
    #[serde(default)]
    pub user_book_reads: Vec<ReadSession>,
}

impl Payload for ReadSessionsData {}

/// Variables for writing a read session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadInput {
    /// Progress in remote pages.
    pub progress_pages: u32,
    /// Edition to count pages against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_id: Option<i64>,
    /// Session start date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<NaiveDate>,
}

/// Variables for creating or updating a library entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBookInput {
    /// Catalog book id, set on create only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_id: Option<i64>,
    /// Reading status id.
    pub status_id: i64,
    /// Privacy setting id, set on create only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_setting_id: Option<i64>,
}
