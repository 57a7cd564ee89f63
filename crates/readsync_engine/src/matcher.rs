//! Book matcher.
//!
//! Resolves local book metadata to a remote catalog book, then makes sure the
//! book is in the user's library so progress can be written against it.

use crate::client::RemoteApi;
use crate::error::SyncResult;
use crate::translator::Layout;
use readsync_protocol::{CatalogBook, PrivacySetting, ReadingStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Weight of the title in a candidate score.
pub const TITLE_WEIGHT: f64 = 70.0;

/// Weight of the best-matching author in a candidate score.
pub const AUTHOR_WEIGHT: f64 = 30.0;

/// A candidate must score strictly above this to be accepted.
pub const ACCEPT_SCORE: f64 = 60.0;

const SEARCH_PAGE_SIZE: u32 = 10;

/// Metadata of a local book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    /// Local identity of the book.
    pub key: String,
    /// Title.
    pub title: String,
    /// Primary author.
    pub author: Option<String>,
    /// ISBN-10 or ISBN-13.
    pub isbn: Option<String>,
    /// Pagination kind.
    pub layout: Layout,
}

impl BookMetadata {
    /// Creates metadata for a reflowable book without author or ISBN.
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            author: None,
            isbn: None,
            layout: Layout::Reflowable,
        }
    }

    /// Sets the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the ISBN.
    pub fn with_isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = Some(isbn.into());
        self
    }

    /// Sets the layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    fn search_text(&self) -> String {
        match self.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(author) => format!("{} {}", self.title.trim(), author),
            None => self.title.trim().to_string(),
        }
    }
}

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// Exact ISBN match.
    Isbn,
    /// Title and author scoring.
    Fuzzy,
    /// Chosen by the user.
    Manual,
}

/// An accepted catalog book.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    /// Catalog book id.
    pub book_id: i64,
    /// Catalog title.
    pub title: String,
    /// Score in `0..=100`; 100 for ISBN and manual matches.
    pub score: f64,
    /// How the candidate was found.
    pub method: MatchMethod,
}

/// A catalog book linked into the user's library.
#[derive(Debug, Clone, PartialEq)]
pub struct BookMatch {
    /// The accepted candidate.
    pub candidate: MatchCandidate,
    /// Library entry id.
    pub link_id: i64,
}

/// Resolves local books to remote library entries.
#[derive(Clone)]
pub struct BookMatcher {
    api: Arc<dyn RemoteApi>,
}

impl BookMatcher {
    /// Creates a matcher.
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    /// Finds a candidate and links it into the library.
    ///
    /// Returns `Ok(None)` when no candidate is good enough; the caller must
    /// then ask the user to pick one.
    pub async fn match_book(&self, meta: &BookMetadata) -> SyncResult<Option<BookMatch>> {
        let Some(candidate) = self.find_candidate(meta).await? else {
            info!(book = %meta.key, title = %meta.title, "no acceptable catalog match");
            return Ok(None);
        };
        let link_id = self.ensure_in_library(candidate.book_id).await?;
        info!(
            book = %meta.key,
            remote_book = candidate.book_id,
            link_id,
            score = candidate.score,
            "matched book"
        );
        Ok(Some(BookMatch { candidate, link_id }))
    }

    /// Finds the best catalog candidate without touching the library.
    pub async fn find_candidate(&self, meta: &BookMetadata) -> SyncResult<Option<MatchCandidate>> {
        if let Some(isbn) = meta.isbn.as_deref().filter(|i| !i.trim().is_empty()) {
            if let Some(candidate) = self.by_isbn(isbn).await? {
                return Ok(Some(candidate));
            }
            debug!(book = %meta.key, isbn, "no exact ISBN match, falling back to title search");
        }
        self.by_title(meta).await
    }

    /// Returns the library entry for a catalog book, adding the book with a
    /// "currently reading" status if it is absent.
    pub async fn ensure_in_library(&self, book_id: i64) -> SyncResult<i64> {
        if let Some(entry) = self.api.find_library_entry(book_id).await? {
            return Ok(entry.id);
        }
        let link_id = self
            .api
            .add_to_library(book_id, ReadingStatus::CurrentlyReading, PrivacySetting::default())
            .await?;
        info!(remote_book = book_id, link_id, "added book to library");
        Ok(link_id)
    }

    async fn by_isbn(&self, isbn: &str) -> SyncResult<Option<MatchCandidate>> {
        let ids = self.api.search_catalog(isbn, SEARCH_PAGE_SIZE).await?;
        let books = self.api.books_by_ids(&ids).await?;
        Ok(books
            .into_iter()
            .find(|b| b.has_isbn(isbn))
            .map(|b| MatchCandidate {
                book_id: b.id,
                title: b.title,
                score: 100.0,
                method: MatchMethod::Isbn,
            }))
    }

    async fn by_title(&self, meta: &BookMetadata) -> SyncResult<Option<MatchCandidate>> {
        let ids = self
            .api
            .search_catalog(&meta.search_text(), SEARCH_PAGE_SIZE)
            .await?;
        let books = self.api.books_by_ids(&ids).await?;
        Ok(best_candidate(meta, &books))
    }
}

/// Picks the highest-scoring candidate above [`ACCEPT_SCORE`].
///
/// Ties keep the earlier candidate, which is the better search hit.
pub fn best_candidate(meta: &BookMetadata, books: &[CatalogBook]) -> Option<MatchCandidate> {
    let mut best: Option<MatchCandidate> = None;
    for book in books {
        let score = score(&meta.title, meta.author.as_deref(), book);
        debug!(remote_book = book.id, title = %book.title, score, "scored candidate");
        if score <= ACCEPT_SCORE {
            continue;
        }
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(MatchCandidate {
                book_id: book.id,
                title: book.title.clone(),
                score,
                method: MatchMethod::Fuzzy,
            });
        }
    }
    best
}

/// Scores a catalog book against a local title and author.
pub fn score(title: &str, author: Option<&str>, book: &CatalogBook) -> f64 {
    let title_score = similarity(title, &book.title);
    let author_score = match author {
        Some(author) => book
            .author_names()
            .map(|name| similarity(author, name))
            .fold(0.0, f64::max),
        None => 0.0,
    };
    TITLE_WEIGHT * title_score + AUTHOR_WEIGHT * author_score
}

/// Returns `1 - edit_distance / longer_length` on case-folded, trimmed input.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Levenshtein distance over two rows.
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use readsync_protocol::{Author, Contribution};

    fn book(id: i64, title: &str, authors: &[&str]) -> CatalogBook {
        CatalogBook {
            id,
            title: title.into(),
            pages: None,
            contributions: authors
                .iter()
                .map(|name| Contribution {
                    author: Author {
                        name: (*name).into(),
                    },
                })
                .collect(),
            editions: Vec::new(),
        }
    }

    #[test]
    fn exact_title_and_author_scores_full() {
        let candidate = book(1, "Dune", &["Frank Herbert"]);
        assert_eq!(score("Dune", Some("Frank Herbert"), &candidate), 100.0);

        let meta = BookMetadata::new("local", "Dune").with_author("Frank Herbert");
        let matched = best_candidate(&meta, &[candidate]).unwrap();
        assert_eq!(matched.book_id, 1);
        assert_eq!(matched.method, MatchMethod::Fuzzy);
    }

    #[test]
    fn low_score_is_no_match() {
        let meta = BookMetadata::new("local", "Dune").with_author("Frank Herbert");
        let candidates = [book(2, "The Hobbit", &["J. R. R. Tolkien"])];
        assert!(score("Dune", Some("Frank Herbert"), &candidates[0]) <= ACCEPT_SCORE);
        assert!(best_candidate(&meta, &candidates).is_none());
    }

    #[test]
    fn highest_score_wins() {
        let meta = BookMetadata::new("local", "Dune Messiah").with_author("Frank Herbert");
        let candidates = [
            book(1, "Dune", &["Frank Herbert"]),
            book(2, "Dune Messiah", &["Frank Herbert"]),
        ];
        assert_eq!(best_candidate(&meta, &candidates).unwrap().book_id, 2);
    }

    #[test]
    fn best_author_is_used() {
        let candidate = book(1, "Good Omens", &["Neil Gaiman", "Terry Pratchett"]);
        assert_eq!(score("Good Omens", Some("Terry Pratchett"), &candidate), 100.0);
    }

    #[test]
    fn missing_author_scores_title_only() {
        let candidate = book(1, "Dune", &["Frank Herbert"]);
        assert_eq!(score("Dune", None, &candidate), TITLE_WEIGHT);
    }

    #[test]
    fn similarity_is_normalized() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("  DUNE ", "dune"), 1.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn search_text_joins_title_and_author() {
        let meta = BookMetadata::new("k", " Dune ").with_author("Frank Herbert");
        assert_eq!(meta.search_text(), "Dune Frank Herbert");
        assert_eq!(BookMetadata::new("k", "Dune").search_text(), "Dune");
    }
}
