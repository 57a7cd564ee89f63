//! In-memory remote for tests.

use crate::http::{HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use readsync_protocol::{
    BookPages, CatalogBook, GraphqlRequest, Operation, ReadInput, ReadSession, RemoteUser,
    UserBook, UserBookEdition, UserBookInput,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A failure the mock returns instead of handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// HTTP status with an empty body.
    Status(u16),
    /// The request never produces a response.
    Transport(String),
    /// HTTP 200 with a top-level GraphQL error.
    Graphql {
        /// Error message.
        message: String,
        /// Extension code.
        code: Option<String>,
    },
}

impl MockFailure {
    fn respond(self) -> Result<HttpResponse, String> {
        match self {
            MockFailure::Status(status) => Ok(HttpResponse::status(status)),
            MockFailure::Transport(message) => Err(message),
            MockFailure::Graphql { message, code } => Ok(graphql_error(&message, code.as_deref())),
        }
    }
}

#[derive(Debug, Clone)]
struct LibraryRow {
    id: i64,
    book_id: i64,
    status_id: i64,
    edition_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ReadRow {
    link_id: i64,
    session: ReadSession,
}

#[derive(Debug)]
struct MockState {
    user: RemoteUser,
    token: String,
    catalog: Vec<CatalogBook>,
    library: Vec<LibraryRow>,
    reads: Vec<ReadRow>,
    next_id: i64,
    latency: Duration,
    failures: VecDeque<MockFailure>,
    operation_failures: HashMap<Operation, VecDeque<MockFailure>>,
    calls: HashMap<Operation, usize>,
    keepalive_calls: usize,
}

impl MockState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn handle(&mut self, operation: Operation, vars: &Value) -> Value {
        match operation {
            Operation::Me => json!({ "me": [self.user] }),
            Operation::SearchCatalog => {
                let query = vars["query"].as_str().unwrap_or_default();
                json!({ "search": { "ids": self.search(query) } })
            }
            Operation::BooksByIds => {
                let ids: Vec<i64> = serde_json::from_value(vars["ids"].clone()).unwrap_or_default();
                let books: Vec<&CatalogBook> =
                    self.catalog.iter().filter(|b| ids.contains(&b.id)).collect();
                json!({ "books": books })
            }
            Operation::UserBook => {
                let id = vars["id"].as_i64().unwrap_or_default();
                json!({ "user_books_by_pk": self.user_book(id) })
            }
            Operation::FindLibraryEntry => {
                let book_id = vars["bookId"].as_i64().unwrap_or_default();
                let entries: Vec<Value> = self
                    .library
                    .iter()
                    .filter(|row| row.book_id == book_id)
                    .map(|row| json!({ "id": row.id, "book_id": row.book_id, "status_id": row.status_id }))
                    .collect();
                json!({ "me": [{ "user_books": entries }] })
            }
            Operation::InsertReadSession => {
                let link_id = vars["userBookId"].as_i64().unwrap_or_default();
                let read: Option<ReadInput> = serde_json::from_value(vars["read"].clone()).ok();
                json!({ "insert_user_book_read": self.insert_read(link_id, read) })
            }
            Operation::UpdateReadSession => {
                let id = vars["id"].as_i64().unwrap_or_default();
                let read: Option<ReadInput> = serde_json::from_value(vars["read"].clone()).ok();
                json!({ "update_user_book_read": self.update_read(id, read) })
            }
            Operation::InsertUserBook => {
                let object: Option<UserBookInput> =
                    serde_json::from_value(vars["object"].clone()).ok();
                json!({ "insert_user_book": self.insert_user_book(object) })
            }
            Operation::UpdateUserBook => {
                let id = vars["id"].as_i64().unwrap_or_default();
                let object: Option<UserBookInput> =
                    serde_json::from_value(vars["object"].clone()).ok();
                let row = self.library.iter_mut().find(|row| row.id == id);
                let updated = match (row, object) {
                    (Some(row), Some(object)) => {
                        row.status_id = object.status_id;
                        Some(row.id)
                    }
                    _ => None,
                };
                json!({ "update_user_book": { "error": null, "id": updated } })
            }
            Operation::DeleteReadSession => {
                let id = vars["id"].as_i64().unwrap_or_default();
                let before = self.reads.len();
                self.reads.retain(|r| r.session.id != id);
                let deleted = (self.reads.len() < before).then_some(id);
                json!({ "delete_user_book_read": { "id": deleted } })
            }
            Operation::ListReadSessions => {
                let link_id = vars["userBookId"].as_i64().unwrap_or_default();
                let mut sessions: Vec<&ReadSession> = self
                    .reads
                    .iter()
                    .filter(|r| r.link_id == link_id)
                    .map(|r| &r.session)
                    .collect();
                sessions.sort_by_key(|s| s.id);
                json!({ "user_book_reads": sessions })
            }
        }
    }

    fn search(&self, query: &str) -> Vec<i64> {
        let query = query.to_lowercase();
        self.catalog
            .iter()
            .filter(|b| {
                let title = b.title.to_lowercase();
                b.has_isbn(&query) || (!title.is_empty() && query.contains(&title))
            })
            .map(|b| b.id)
            .collect()
    }

    fn user_book(&self, id: i64) -> Option<UserBook> {
        let row = self.library.iter().find(|row| row.id == id)?;
        let book = self.catalog.iter().find(|b| b.id == row.book_id);
        let edition = row.edition_id.map(|edition_id| UserBookEdition {
            id: edition_id,
            pages: book
                .and_then(|b| b.editions.iter().find(|e| e.id == edition_id))
                .and_then(|e| e.pages),
        });
        let mut reads: Vec<ReadSession> = self
            .reads
            .iter()
            .filter(|r| r.link_id == id && r.session.finished_at.is_none())
            .map(|r| r.session.clone())
            .collect();
        reads.sort_by_key(|s| std::cmp::Reverse(s.id));
        Some(UserBook {
            id: row.id,
            book_id: row.book_id,
            status_id: Some(row.status_id),
            edition,
            book: BookPages {
                pages: book.and_then(|b| b.pages),
            },
            user_book_reads: reads,
        })
    }

    fn insert_read(&mut self, link_id: i64, read: Option<ReadInput>) -> Value {
        let Some(read) = read else {
            return json!({ "error": "invalid input", "user_book_read": null });
        };
        let Some(edition_id) = self
            .library
            .iter()
            .find(|row| row.id == link_id)
            .map(|row| row.edition_id)
        else {
            return json!({ "error": "User book not found", "user_book_read": null });
        };
        let session = ReadSession {
            id: self.allocate_id(),
            progress_pages: Some(read.progress_pages),
            started_at: read.started_at,
            finished_at: None,
            edition_id: read.edition_id.or(edition_id),
            updated_at: Some(Utc::now()),
        };
        self.reads.push(ReadRow {
            link_id,
            session: session.clone(),
        });
        json!({ "error": null, "user_book_read": session })
    }

    fn update_read(&mut self, id: i64, read: Option<ReadInput>) -> Value {
        let Some(read) = read else {
            return json!({ "error": "invalid input", "user_book_read": null });
        };
        let Some(row) = self.reads.iter_mut().find(|r| r.session.id == id) else {
            return json!({ "error": "Read not found", "user_book_read": null });
        };
        if row.session.finished_at.is_some() {
            return json!({ "error": "Read is already finished", "user_book_read": null });
        }
        row.session.progress_pages = Some(read.progress_pages);
        if read.edition_id.is_some() {
            row.session.edition_id = read.edition_id;
        }
        if read.started_at.is_some() {
            row.session.started_at = read.started_at;
        }
        row.session.updated_at = Some(Utc::now());
        json!({ "error": null, "user_book_read": row.session })
    }

    fn insert_user_book(&mut self, object: Option<UserBookInput>) -> Value {
        let Some(book_id) = object.as_ref().and_then(|o| o.book_id) else {
            return json!({ "error": "book_id is required", "id": null });
        };
        if !self.catalog.iter().any(|b| b.id == book_id) {
            return json!({ "error": "Book does not exist", "id": null });
        }
        let id = self.allocate_id();
        self.library.push(LibraryRow {
            id,
            book_id,
            status_id: object.map(|o| o.status_id).unwrap_or(2),
            edition_id: None,
        });
        json!({ "error": null, "id": id })
    }
}

fn graphql_error(message: &str, code: Option<&str>) -> HttpResponse {
    let body = json!({
        "errors": [{ "message": message, "extensions": { "code": code } }]
    });
    HttpResponse::ok(body.to_string())
}

/// In-memory remote reading tracker speaking the GraphQL wire format.
///
/// Clones share state, so a test can keep a handle while the client owns
/// another.
#[derive(Debug, Clone)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    /// Creates an empty remote accepting `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                user: RemoteUser {
                    id: 1,
                    username: "reader".into(),
                },
                token: token.into(),
                catalog: Vec::new(),
                library: Vec::new(),
                reads: Vec::new(),
                next_id: 100,
                latency: Duration::ZERO,
                failures: VecDeque::new(),
                operation_failures: HashMap::new(),
                calls: HashMap::new(),
                keepalive_calls: 0,
            })),
        }
    }

    /// Sets the user returned by the identity query.
    pub fn set_user(&self, id: i64, username: impl Into<String>) {
        self.state.lock().user = RemoteUser {
            id,
            username: username.into(),
        };
    }

    /// Adds a catalog book.
    pub fn add_book(&self, book: CatalogBook) {
        self.state.lock().catalog.push(book);
    }

    /// Adds a library entry and returns its id.
    pub fn add_library_entry(&self, book_id: i64, edition_id: Option<i64>) -> i64 {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.library.push(LibraryRow {
            id,
            book_id,
            status_id: 2,
            edition_id,
        });
        id
    }

    /// Removes a library entry and its read sessions.
    pub fn remove_library_entry(&self, link_id: i64) {
        let mut state = self.state.lock();
        state.library.retain(|row| row.id != link_id);
        state.reads.retain(|r| r.link_id != link_id);
    }

    /// Adds a read session and returns its id.
    pub fn add_read(
        &self,
        link_id: i64,
        progress_pages: u32,
        updated_at: Option<DateTime<Utc>>,
    ) -> i64 {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let edition_id = state
            .library
            .iter()
            .find(|row| row.id == link_id)
            .and_then(|row| row.edition_id);
        state.reads.push(ReadRow {
            link_id,
            session: ReadSession {
                id,
                progress_pages: Some(progress_pages),
                started_at: NaiveDate::from_ymd_opt(2024, 1, 1),
                finished_at: None,
                edition_id,
                updated_at,
            },
        });
        id
    }

    /// Marks a read session as finished.
    pub fn finish_read(&self, session_id: i64) {
        let mut state = self.state.lock();
        if let Some(row) = state.reads.iter_mut().find(|r| r.session.id == session_id) {
            row.session.finished_at = NaiveDate::from_ymd_opt(2024, 2, 1);
        }
    }

    /// Deletes a read session behind the client's back.
    pub fn delete_read(&self, session_id: i64) {
        self.state.lock().reads.retain(|r| r.session.id != session_id);
    }

    /// Returns a read session.
    pub fn read(&self, session_id: i64) -> Option<ReadSession> {
        self.state
            .lock()
            .reads
            .iter()
            .find(|r| r.session.id == session_id)
            .map(|r| r.session.clone())
    }

    /// Returns every read session of a library entry, oldest first.
    pub fn reads_for(&self, link_id: i64) -> Vec<ReadSession> {
        let mut reads: Vec<ReadSession> = self
            .state
            .lock()
            .reads
            .iter()
            .filter(|r| r.link_id == link_id)
            .map(|r| r.session.clone())
            .collect();
        reads.sort_by_key(|s| s.id);
        reads
    }

    /// Returns the reading status id of a library entry.
    pub fn status_of(&self, link_id: i64) -> Option<i64> {
        self.state
            .lock()
            .library
            .iter()
            .find(|row| row.id == link_id)
            .map(|row| row.status_id)
    }

    /// Returns the library entry id for a catalog book.
    pub fn library_entry_for(&self, book_id: i64) -> Option<i64> {
        self.state
            .lock()
            .library
            .iter()
            .find(|row| row.book_id == book_id)
            .map(|row| row.id)
    }

    /// Delays every response.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Queues a failure for the next request.
    pub fn push_failure(&self, failure: MockFailure) {
        self.state.lock().failures.push_back(failure);
    }

    /// Queues a failure for the next request named `operation`.
    ///
    /// Taken before the failures queued with [`MockRemote::push_failure`].
    pub fn push_failure_for(&self, operation: Operation, failure: MockFailure) {
        self.state
            .lock()
            .operation_failures
            .entry(operation)
            .or_default()
            .push_back(failure);
    }

    /// Returns how many requests named `operation` arrived.
    pub fn calls(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Returns how many requests arrived.
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Returns how many read-session writes arrived.
    pub fn progress_writes(&self) -> usize {
        self.calls(Operation::InsertReadSession) + self.calls(Operation::UpdateReadSession)
    }

    /// Returns how many requests asked for best-effort delivery.
    pub fn keepalive_calls(&self) -> usize {
        self.state.lock().keepalive_calls
    }
}

#[async_trait]
impl HttpClient for MockRemote {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let Ok(graphql) = GraphqlRequest::decode(&request.body) else {
            return Ok(HttpResponse::status(400));
        };
        let Some(operation) = Operation::from_name(&graphql.operation_name) else {
            return Ok(HttpResponse::status(400));
        };

        let (latency, failure) = {
            let mut state = self.state.lock();
            *state.calls.entry(operation).or_default() += 1;
            if request.keepalive {
                state.keepalive_calls += 1;
            }
            let failure = state
                .operation_failures
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.failures.pop_front());
            (state.latency, failure)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = failure {
            return failure.respond();
        }

        let mut state = self.state.lock();
        if request.bearer != state.token {
            return Ok(graphql_error("Could not verify JWT", Some("invalid-jwt")));
        }
        let data = state.handle(operation, &graphql.variables);
        Ok(HttpResponse::ok(json!({ "data": data }).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readsync_protocol::{CatalogEdition, GraphqlResponse, UserBookData};

    fn request(operation: Operation, variables: Value, bearer: &str) -> HttpRequest {
        HttpRequest {
            url: "mock://".into(),
            bearer: bearer.into(),
            body: GraphqlRequest::new(operation, variables).encode().unwrap(),
            keepalive: false,
        }
    }

    fn dune() -> CatalogBook {
        CatalogBook {
            id: 1,
            title: "Dune".into(),
            pages: Some(600),
            contributions: Vec::new(),
            editions: vec![CatalogEdition {
                id: 11,
                isbn_10: None,
                isbn_13: Some("9780441172719".into()),
                pages: Some(412),
            }],
        }
    }

    #[tokio::test]
    async fn serves_user_book_with_edition_pages() {
        let remote = MockRemote::new("tok");
        remote.add_book(dune());
        let link = remote.add_library_entry(1, Some(11));
        remote.add_read(link, 120, None);

        let response = remote
            .post(request(Operation::UserBook, json!({ "id": link }), "tok"))
            .await
            .unwrap();
        let entry = GraphqlResponse::<UserBookData>::decode(&response.body)
            .unwrap()
            .data
            .unwrap()
            .user_books_by_pk
            .unwrap();

        assert_eq!(entry.total_pages(), Some(412));
        assert_eq!(entry.active_session().unwrap().progress(), 120);
        assert_eq!(remote.calls(Operation::UserBook), 1);
    }

    #[tokio::test]
    async fn rejects_wrong_token() {
        let remote = MockRemote::new("tok");
        let response = remote
            .post(request(Operation::Me, json!({}), "other"))
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["errors"][0]["extensions"]["code"], "invalid-jwt");
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let remote = MockRemote::new("tok");
        remote.push_failure(MockFailure::Status(503));
        remote.push_failure(MockFailure::Transport("reset".into()));

        let first = remote.post(request(Operation::Me, json!({}), "tok")).await;
        assert_eq!(first.unwrap().status, 503);
        let second = remote.post(request(Operation::Me, json!({}), "tok")).await;
        assert!(second.is_err());
        let third = remote.post(request(Operation::Me, json!({}), "tok")).await;
        assert!(third.unwrap().is_success());
        assert_eq!(remote.total_calls(), 3);
    }

    #[tokio::test]
    async fn operation_failures_wait_for_their_operation() {
        let remote = MockRemote::new("tok");
        remote.push_failure_for(Operation::DeleteReadSession, MockFailure::Status(502));

        let me = remote.post(request(Operation::Me, json!({}), "tok")).await;
        assert!(me.unwrap().is_success());
        let delete = remote
            .post(request(Operation::DeleteReadSession, json!({ "id": 1 }), "tok"))
            .await;
        assert_eq!(delete.unwrap().status, 502);
    }

    #[tokio::test]
    async fn search_matches_isbn_and_title() {
        let remote = MockRemote::new("tok");
        remote.add_book(dune());
        assert_eq!(remote.state.lock().search("978-0441172719"), vec![1]);
        assert_eq!(remote.state.lock().search("Dune Frank Herbert"), vec![1]);
        assert!(remote.state.lock().search("Hobbit").is_empty());
    }
}
