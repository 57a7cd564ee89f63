//! Remote API client.
//!
//! Every call runs the same pipeline: gate admission, throttle delay,
//! credential check, HTTP POST, classification. The outcome is always
//! reported back to the failure gate.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gate::FailureGate;
use crate::http::{HttpClient, HttpRequest};
use crate::throttle::RequestThrottle;
use async_trait::async_trait;
use readsync_protocol::{
    BooksData, CatalogBook, DeleteReadData, GraphqlRequest, GraphqlResponse, LibraryEntry,
    LibraryLookupData, MeData, Operation, Payload, PrivacySetting, ProtocolError, ReadInput,
    ReadMutationData, ReadSession, ReadSessionsData, ReadingStatus, RemoteErrorCode, RemoteUser,
    SearchData, UserBook, UserBookData, UserBookInput, UserBookMutationData,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// How hard a write should try to reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Cancelled together with the caller.
    #[default]
    Normal,
    /// Survives the caller going away (view unload, book close).
    BestEffort,
}

/// The typed operation set of the remote reading tracker.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Identifies the owner of the credential.
    async fn me(&self) -> SyncResult<RemoteUser>;

    /// Full-text catalog search; returns catalog book ids.
    async fn search_catalog(&self, text: &str, per_page: u32) -> SyncResult<Vec<i64>>;

    /// Fetches catalog metadata for a batch of ids.
    async fn books_by_ids(&self, ids: &[i64]) -> SyncResult<Vec<CatalogBook>>;

    /// Fetches a library entry with its active read sessions.
    async fn user_book(&self, link_id: i64) -> SyncResult<UserBook>;

    /// Looks up the caller's library entry for a catalog book.
    async fn find_library_entry(&self, book_id: i64) -> SyncResult<Option<LibraryEntry>>;

    /// Starts a read session.
    async fn create_read_session(
        &self,
        link_id: i64,
        read: ReadInput,
        delivery: Delivery,
    ) -> SyncResult<ReadSession>;

    /// Updates a read session.
    async fn update_read_session(
        &self,
        session_id: i64,
        read: ReadInput,
        delivery: Delivery,
    ) -> SyncResult<ReadSession>;

    /// Adds a catalog book to the library; returns the new link id.
    async fn add_to_library(
        &self,
        book_id: i64,
        status: ReadingStatus,
        privacy: PrivacySetting,
    ) -> SyncResult<i64>;

    /// Changes the reading status of a library entry.
    async fn update_status(&self, link_id: i64, status: ReadingStatus) -> SyncResult<()>;

    /// Deletes a read session.
    async fn delete_read_session(&self, session_id: i64) -> SyncResult<()>;

    /// Lists every read session of a library entry.
    async fn list_read_sessions(&self, link_id: i64) -> SyncResult<Vec<ReadSession>>;
}

/// Remote API client over an [`HttpClient`].
pub struct RemoteClient<C: HttpClient> {
    http: C,
    endpoint: String,
    token: Option<String>,
    debug: bool,
    gate: Arc<FailureGate>,
    throttle: Arc<RequestThrottle>,
}

impl<C: HttpClient> RemoteClient<C> {
    /// Creates a client sharing the given gate and throttle.
    pub fn new(
        config: &SyncConfig,
        http: C,
        gate: Arc<FailureGate>,
        throttle: Arc<RequestThrottle>,
    ) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            token: config.token().map(str::to_string),
            debug: config.debug,
            gate,
            throttle,
        }
    }

    /// Returns the shared failure gate.
    pub fn gate(&self) -> &Arc<FailureGate> {
        &self.gate
    }

    /// Returns the HTTP client.
    pub fn http(&self) -> &C {
        &self.http
    }

    /// Executes a named operation.
    pub async fn execute<T: Payload>(
        &self,
        operation: Operation,
        variables: Value,
        delivery: Delivery,
    ) -> SyncResult<T> {
        // Local rejection: nothing to report.
        let admission = self.gate.admit()?;
        self.throttle.acquire().await;

        let result = match self.token.as_deref() {
            Some(token) => self.send(operation, variables, token, delivery).await,
            None => Err(SyncError::AuthFailed("no API token configured".into())),
        };

        match &result {
            Ok(_) => admission.succeeded(),
            Err(e) => {
                warn!(
                    operation = operation.name(),
                    kind = %e.kind(),
                    error = %e,
                    "remote call failed"
                );
                admission.failed(e.kind());
            }
        }
        result
    }

    async fn send<T: Payload>(
        &self,
        operation: Operation,
        variables: Value,
        token: &str,
        delivery: Delivery,
    ) -> SyncResult<T> {
        let request = GraphqlRequest::new(operation, variables);
        if self.debug {
            debug!(operation = operation.name(), variables = %request.variables, "remote request");
        }

        let response = self
            .http
            .post(HttpRequest {
                url: self.endpoint.clone(),
                bearer: token.to_string(),
                body: request.encode()?,
                keepalive: delivery == Delivery::BestEffort,
            })
            .await
            .map_err(SyncError::Network)?;

        let body = String::from_utf8_lossy(&response.body);
        if self.debug {
            debug!(
                operation = operation.name(),
                status = response.status,
                body = %body,
                "remote response"
            );
        }
        if !response.is_success() {
            return Err(SyncError::from_status(
                response.status,
                &body,
                response.retry_after,
            ));
        }

        let envelope = GraphqlResponse::<T>::decode(&response.body)?;
        if let Some(error) = envelope.primary_error() {
            return Err(match error.code() {
                RemoteErrorCode::Unauthorized => SyncError::AuthFailed(error.message.clone()),
                RemoteErrorCode::RateLimited => SyncError::RateLimited {
                    retry_after: response.retry_after,
                },
                _ => SyncError::Graphql(error.message.clone()),
            });
        }

        let data = envelope.data.ok_or(ProtocolError::EmptyResponse)?;
        if let Some(error) = data.embedded_error() {
            return Err(error.into());
        }
        Ok(data)
    }
}

#[async_trait]
impl<C: HttpClient> RemoteApi for RemoteClient<C> {
    async fn me(&self) -> SyncResult<RemoteUser> {
        let data: MeData = self
            .execute(Operation::Me, json!({}), Delivery::Normal)
            .await?;
        data.me
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::AuthFailed("credential does not identify a user".into()))
    }

    async fn search_catalog(&self, text: &str, per_page: u32) -> SyncResult<Vec<i64>> {
        let data: SearchData = self
            .execute(
                Operation::SearchCatalog,
                json!({ "query": text, "perPage": per_page }),
                Delivery::Normal,
            )
            .await?;
        Ok(data.search.ids)
    }

    async fn books_by_ids(&self, ids: &[i64]) -> SyncResult<Vec<CatalogBook>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let data: BooksData = self
            .execute(Operation::BooksByIds, json!({ "ids": ids }), Delivery::Normal)
            .await?;
        Ok(data.books)
    }

    async fn user_book(&self, link_id: i64) -> SyncResult<UserBook> {
        let data: UserBookData = self
            .execute(Operation::UserBook, json!({ "id": link_id }), Delivery::Normal)
            .await?;
        data.user_books_by_pk
            .ok_or_else(|| SyncError::InvalidLink(format!("library entry {}", link_id)))
    }

    async fn find_library_entry(&self, book_id: i64) -> SyncResult<Option<LibraryEntry>> {
        let data: LibraryLookupData = self
            .execute(
                Operation::FindLibraryEntry,
                json!({ "bookId": book_id }),
                Delivery::Normal,
            )
            .await?;
        Ok(data.entry().cloned())
    }

    async fn create_read_session(
        &self,
        link_id: i64,
        read: ReadInput,
        delivery: Delivery,
    ) -> SyncResult<ReadSession> {
        let data: ReadMutationData = self
            .execute(
                Operation::InsertReadSession,
                json!({ "userBookId": link_id, "read": read }),
                delivery,
            )
            .await?;
        data.session()
            .cloned()
            .ok_or_else(|| SyncError::Graphql("mutation returned no read session".into()))
    }

    async fn update_read_session(
        &self,
        session_id: i64,
        read: ReadInput,
        delivery: Delivery,
    ) -> SyncResult<ReadSession> {
        let data: ReadMutationData = self
            .execute(
                Operation::UpdateReadSession,
                json!({ "id": session_id, "read": read }),
                delivery,
            )
            .await
            .map_err(|e| match e {
                // The missing record is the session, not the library entry.
                SyncError::InvalidLink(message) => SyncError::StaleSession(message),
                other => other,
            })?;
        data.session()
            .cloned()
            .ok_or_else(|| SyncError::Graphql("mutation returned no read session".into()))
    }

    async fn add_to_library(
        &self,
        book_id: i64,
        status: ReadingStatus,
        privacy: PrivacySetting,
    ) -> SyncResult<i64> {
        let object = UserBookInput {
            book_id: Some(book_id),
            status_id: status.to_id(),
            privacy_setting_id: Some(privacy.to_id()),
        };
        let data: UserBookMutationData = self
            .execute(
                Operation::InsertUserBook,
                json!({ "object": object }),
                Delivery::Normal,
            )
            .await?;
        data.id()
            .ok_or_else(|| SyncError::Graphql("insert returned no library entry".into()))
    }

    async fn update_status(&self, link_id: i64, status: ReadingStatus) -> SyncResult<()> {
        let object = UserBookInput {
            book_id: None,
            status_id: status.to_id(),
            privacy_setting_id: None,
        };
        let _: UserBookMutationData = self
            .execute(
                Operation::UpdateUserBook,
                json!({ "id": link_id, "object": object }),
                Delivery::Normal,
            )
            .await?;
        Ok(())
    }

    async fn delete_read_session(&self, session_id: i64) -> SyncResult<()> {
        let _: DeleteReadData = self
            .execute(
                Operation::DeleteReadSession,
                json!({ "id": session_id }),
                Delivery::Normal,
            )
            .await?;
        Ok(())
    }

    async fn list_read_sessions(&self, link_id: i64) -> SyncResult<Vec<ReadSession>> {
        let data: ReadSessionsData = self
            .execute(
                Operation::ListReadSessions,
                json!({ "userBookId": link_id }),
                Delivery::Normal,
            )
            .await?;
        Ok(data.user_book_reads)
    }
}
