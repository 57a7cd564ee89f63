//! Lifecycle manager and per-book registry.

use crate::book::{BookSync, ReaderView};
use crate::client::{RemoteApi, RemoteClient};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{failure_notice, recovery_notice, Notice, SyncEvent};
use crate::gate::{FailureGate, GateStatus};
use crate::http::HttpClient;
use crate::linkage::LinkageStore;
use crate::matcher::BookMetadata;
use crate::throttle::RequestThrottle;
use parking_lot::RwLock;
use readsync_protocol::RemoteUser;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Collaborators shared by every open book.
#[derive(Clone)]
pub struct SyncContext {
    /// Configuration.
    pub config: Arc<SyncConfig>,
    /// Remote API.
    pub api: Arc<dyn RemoteApi>,
    /// Failure gate shared with the API client.
    pub gate: Arc<FailureGate>,
    /// Linkage persistence.
    pub store: Arc<dyn LinkageStore>,
    /// Event channel toward the application.
    pub events: broadcast::Sender<SyncEvent>,
}

/// Open books keyed by local identity.
#[derive(Default)]
pub struct BookRegistry {
    books: RwLock<HashMap<String, Arc<BookSync>>>,
}

impl BookRegistry {
    /// Registers a book, returning the one it replaces.
    pub fn register(&self, book: Arc<BookSync>) -> Option<Arc<BookSync>> {
        self.books.write().insert(book.key().to_string(), book)
    }

    /// Removes a book.
    pub fn unregister(&self, key: &str) -> Option<Arc<BookSync>> {
        self.books.write().remove(key)
    }

    /// Looks up a book.
    pub fn get(&self, key: &str) -> Option<Arc<BookSync>> {
        self.books.read().get(key).cloned()
    }

    /// Returns the keys of all registered books.
    pub fn keys(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    /// Returns the number of registered books.
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Returns true if no book is registered.
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }
}

/// Owns the shared sync resources and the books that use them.
pub struct SyncManager {
    ctx: SyncContext,
    registry: BookRegistry,
}

impl SyncManager {
    /// Creates a manager over an existing API and gate.
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn RemoteApi>,
        gate: Arc<FailureGate>,
        store: Arc<dyn LinkageStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx: SyncContext {
                config: Arc::new(config),
                api,
                gate,
                store,
                events,
            },
            registry: BookRegistry::default(),
        }
    }

    /// Creates a manager with its own gate, throttle and API client.
    pub fn with_http<C: HttpClient>(config: SyncConfig, http: C, store: Arc<dyn LinkageStore>) -> Self {
        let gate = Arc::new(FailureGate::new(config.gate));
        let throttle = Arc::new(RequestThrottle::new(config.effective_rate_limit()));
        let api: Arc<dyn RemoteApi> =
            Arc::new(RemoteClient::new(&config, http, gate.clone(), throttle));
        Self::new(config, api, gate, store)
    }

    /// Returns the shared collaborators.
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    /// Subscribes to notices and linkage updates.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events.subscribe()
    }

    /// Returns a snapshot of the failure gate for display.
    pub fn gate_status(&self) -> GateStatus {
        self.ctx.gate.status()
    }

    /// Verifies the credential and announces the connection.
    pub async fn connect(&self) -> SyncResult<RemoteUser> {
        if !self.ctx.config.enabled {
            return Err(SyncError::NotConfigured);
        }
        let failures_before = self.ctx.gate.status().consecutive_failures;
        match self.ctx.api.me().await {
            Ok(user) => {
                info!(username = %user.username, "connected");
                self.emit(Notice::Connected {
                    username: user.username.clone(),
                });
                if let Some(notice) = recovery_notice(&self.ctx.gate) {
                    self.emit(notice);
                }
                Ok(user)
            }
            Err(e) => {
                if let Some(notice) = failure_notice("", &e, &self.ctx.gate, failures_before) {
                    self.emit(notice);
                }
                Err(e)
            }
        }
    }

    /// Registers a book and runs its open sequence.
    ///
    /// Pull failures are surfaced as notices and do not fail the open. A
    /// book already open under the same key is closed first.
    pub async fn open_book(
        &self,
        meta: BookMetadata,
        view: Arc<dyn ReaderView>,
    ) -> SyncResult<Arc<BookSync>> {
        if !self.ctx.config.enabled {
            return Err(SyncError::NotConfigured);
        }
        if self.registry.get(&meta.key).is_some() {
            self.close_book(&meta.key).await?;
        }

        let book = BookSync::new(self.ctx.clone(), meta, view);
        self.registry.register(book.clone());
        debug!(book = %book.key(), "book opened");

        if let Err(e) = book.open().await {
            debug!(book = %book.key(), error = %e, "open sequence failed");
        }
        Ok(book)
    }

    /// Flushes and unregisters a book.
    pub async fn close_book(&self, key: &str) -> SyncResult<()> {
        let Some(book) = self.registry.unregister(key) else {
            return Ok(());
        };
        let result = book.close().await;
        if let Err(e) = &result {
            warn!(book = %key, error = %e, "final push failed");
        }
        debug!(book = %key, "book closed");
        result
    }

    /// Awaits delivery of a book's pending progress.
    ///
    /// Returns `Ok(false)` if the book is not open or nothing was pending.
    pub async fn force_sync(&self, key: &str) -> SyncResult<bool> {
        match self.registry.get(key) {
            Some(book) => book.force_sync().await,
            None => Ok(false),
        }
    }

    /// Looks up an open book.
    pub fn book(&self, key: &str) -> Option<Arc<BookSync>> {
        self.registry.get(key)
    }

    /// Returns the keys of all open books.
    pub fn open_books(&self) -> Vec<String> {
        self.registry.keys()
    }

    fn emit(&self, notice: Notice) {
        let _ = self.ctx.events.send(SyncEvent::Notice(notice));
    }
}
