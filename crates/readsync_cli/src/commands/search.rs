//! Search command implementation.

use super::RemoteOptions;
use readsync_engine::{similarity, RemoteApi};
use readsync_protocol::CatalogBook;
use serde::Serialize;

/// One search hit.
#[derive(Debug, Serialize)]
pub struct SearchHit {
    /// Catalog book id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Author names.
    pub authors: Vec<String>,
    /// Default page count.
    pub pages: Option<u32>,
    /// Title similarity to the query in `[0, 1]`.
    pub similarity: f64,
}

impl SearchHit {
    fn new(book: &CatalogBook, query: &str) -> Self {
        Self {
            id: book.id,
            title: book.title.clone(),
            authors: book.author_names().map(str::to_string).collect(),
            pages: book.pages,
            similarity: similarity(query, &book.title),
        }
    }
}

/// Runs the search command.
pub async fn run(
    remote: &RemoteOptions,
    query: &str,
    limit: u32,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = remote.client()?;
    let ids = client.search_catalog(query, limit.max(1)).await?;
    let books = if ids.is_empty() {
        Vec::new()
    } else {
        client.books_by_ids(&ids).await?
    };

    // Keep the remote's ranking.
    let hits: Vec<SearchHit> = ids
        .iter()
        .filter_map(|id| books.iter().find(|b| b.id == *id))
        .map(|book| SearchHit::new(book, query))
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&hits)?),
        _ => print_text_output(&hits),
    }
    Ok(())
}

fn print_text_output(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results");
        return;
    }
    for hit in hits {
        let authors = if hit.authors.is_empty() {
            "unknown author".to_string()
        } else {
            hit.authors.join(", ")
        };
        let pages = hit
            .pages
            .map(|p| format!("{} pages", p))
            .unwrap_or_else(|| "pages unknown".to_string());
        println!(
            "{:>8}  {} - {} ({}, similarity {:.2})",
            hit.id, hit.title, authors, pages, hit.similarity
        );
    }
}
