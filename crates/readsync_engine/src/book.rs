//! Per-book sync orchestration.
//!
//! A [`BookSync`] lives from book open to book close. It owns the book's
//! state machine, its debounced push slot and its cached linkage:
//!
//! ```text
//! idle -> matching -> checking -> synced
//!                              -> conflict
//!                              -> error
//! ```
//!
//! A pull always finishes (including the settle delay after navigating)
//! before any push may run, and an open conflict suppresses pushes until the
//! user resolves it.

use crate::client::Delivery;
use crate::config::PushFrequency;
use crate::conflict::{self, ConflictChoice, ConflictRecord, ProgressSnapshot, Resolution};
use crate::error::{SyncError, SyncResult};
use crate::events::{failure_notice, recovery_notice, Notice, SyncEvent};
use crate::linkage::SyncLinkage;
use crate::manager::SyncContext;
use crate::matcher::{BookMatcher, BookMetadata};
use crate::scheduler::Debouncer;
use crate::translator;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use readsync_protocol::{ReadInput, ReadSession, ReadingStatus, UserBook};
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Phase of the per-book state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing has happened yet.
    Idle,
    /// Looking for the remote book.
    Matching,
    /// Comparing local and remote progress.
    Checking,
    /// Local and remote agree.
    Synced,
    /// Waiting for the user to pick a side.
    Conflict,
    /// The last attempt failed; the next attempt retries.
    Error,
}

/// The reader's current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPosition {
    /// 0-based page index.
    pub page_index: u32,
    /// Page count of the current pagination.
    pub total_pages: u32,
    /// Identifier of the current section (chapter).
    pub section: Option<String>,
    /// When the position last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocalPosition {
    /// Creates a position without section or timestamp.
    pub fn new(page_index: u32, total_pages: u32) -> Self {
        Self {
            page_index,
            total_pages,
            section: None,
            updated_at: None,
        }
    }

    /// Sets the section.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Sets the timestamp.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Returns completion in `[0, 1]`.
    pub fn completion(&self) -> f64 {
        translator::completion(self.page_index, self.total_pages)
    }
}

/// The renderer showing the book.
pub trait ReaderView: Send + Sync {
    /// Returns the current position.
    fn position(&self) -> LocalPosition;

    /// Navigates to a 0-based page index.
    fn go_to_page(&self, page_index: u32);
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// The remote has no progress for this book.
    NoRemoteProgress,
    /// The reader was moved to the remote position.
    Applied {
        /// 0-based page index navigated to.
        page_index: u32,
    },
    /// The local position was kept.
    KeptLocal,
    /// Positions already agree.
    InSync,
    /// The user must choose.
    Conflict(ConflictRecord),
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Progress was written.
    Pushed {
        /// Remote page number written.
        remote_page: u32,
        /// Read session written to.
        session_id: i64,
    },
    /// A pull is in flight or a conflict is open.
    Suppressed,
}

/// Result of duplicate-session cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    /// Sessions deleted.
    pub deleted: usize,
    /// Session kept.
    pub kept: Option<i64>,
}

struct BookState {
    phase: SyncPhase,
    pulling: bool,
    conflict: Option<ConflictRecord>,
    last_section: Option<String>,
    status_sent: bool,
    finished_reported: bool,
    linkage: SyncLinkage,
}

/// Clears the pulling flag when the pull ends, however it ends.
struct PullingGuard<'a> {
    state: &'a Mutex<BookState>,
}

impl Drop for PullingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().pulling = false;
    }
}

/// Sync state of one open book.
pub struct BookSync {
    meta: BookMetadata,
    ctx: SyncContext,
    matcher: BookMatcher,
    view: Arc<dyn ReaderView>,
    state: Mutex<BookState>,
    push_lock: tokio::sync::Mutex<()>,
    debouncer: Debouncer,
    this: Weak<BookSync>,
}

impl BookSync {
    /// Creates the sync state for a book, loading its stored linkage.
    pub fn new(ctx: SyncContext, meta: BookMetadata, view: Arc<dyn ReaderView>) -> Arc<Self> {
        let linkage = match ctx.store.load(&meta.key) {
            Ok(linkage) => linkage.unwrap_or_default(),
            Err(e) => {
                warn!(book = %meta.key, error = %e, "failed to load linkage");
                SyncLinkage::default()
            }
        };
        Arc::new_cyclic(|this| Self {
            matcher: BookMatcher::new(ctx.api.clone()),
            debouncer: Debouncer::new(ctx.config.debounce),
            state: Mutex::new(BookState {
                phase: SyncPhase::Idle,
                pulling: false,
                conflict: None,
                last_section: None,
                status_sent: false,
                finished_reported: false,
                linkage,
            }),
            push_lock: tokio::sync::Mutex::new(()),
            this: this.clone(),
            meta,
            ctx,
            view,
        })
    }

    /// Returns the local book identity.
    pub fn key(&self) -> &str {
        &self.meta.key
    }

    /// Returns the book metadata.
    pub fn metadata(&self) -> &BookMetadata {
        &self.meta
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    /// Returns true while a pull is in flight.
    pub fn is_pulling(&self) -> bool {
        self.state.lock().pulling
    }

    /// Returns the open conflict, if any.
    pub fn conflict(&self) -> Option<ConflictRecord> {
        self.state.lock().conflict.clone()
    }

    /// Returns the cached linkage.
    pub fn linkage(&self) -> SyncLinkage {
        self.state.lock().linkage.clone()
    }

    /// Returns true if a debounced push is waiting.
    pub fn has_pending_push(&self) -> bool {
        self.debouncer.has_pending()
    }

    /// Pulls remote progress, then marks the book as currently reading.
    ///
    /// The status is sent whatever the pull's outcome, as long as the book
    /// is linked.
    ///
    /// The pulling flag is raised when this is called, not when the returned
    /// future is first polled.
    pub fn open(&self) -> impl Future<Output = SyncResult<PullOutcome>> + '_ {
        let pull = self.pull();
        async move {
            let outcome = pull.await;
            self.send_status_once().await;
            outcome
        }
    }

    /// Fetches remote progress and acts on it per the configured strategy.
    ///
    /// The pulling flag is raised when this is called and cleared only after
    /// the resolution, including the settle delay after navigation.
    pub fn pull(&self) -> impl Future<Output = SyncResult<PullOutcome>> + '_ {
        let guard = self.begin_pulling();
        async move {
            let _guard = guard;
            if !self.ctx.config.enabled {
                return Err(SyncError::NotConfigured);
            }
            let failures_before = self.failures();
            let result = self.pull_inner().await;
            self.settle(&result, failures_before);
            result
        }
    }

    /// Reacts to a local position change per the push frequency.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_progress_changed(&self, position: LocalPosition) {
        if !self.ctx.config.enabled {
            return;
        }

        let (section_changed, reached_end) = {
            let mut state = self.state.lock();
            if state.pulling || state.conflict.is_some() {
                // The section stays unseen so the next event still pushes.
                debug!(book = %self.meta.key, "push suppressed while pulling or in conflict");
                return;
            }
            let section_changed = position.section != state.last_section;
            state.last_section = position.section.clone();
            let reached_end = !state.finished_reported
                && state.linkage.is_linked()
                && position.completion() >= 1.0;
            if reached_end {
                state.finished_reported = true;
            }
            (section_changed, reached_end)
        };

        if reached_end {
            self.spawn_finished_status();
        }

        let schedule = match self.ctx.config.push_frequency {
            PushFrequency::Page => true,
            PushFrequency::Chapter => section_changed,
            PushFrequency::Session => false,
        };
        if schedule {
            self.schedule_push();
        }
    }

    /// Writes the current local position to the remote.
    ///
    /// Suppressed while a pull is in flight or a conflict is open. An update
    /// against a finished or deleted read session falls back once to creating
    /// a new session.
    pub async fn push(&self, delivery: Delivery) -> SyncResult<PushOutcome> {
        let _serial = self.push_lock.lock().await;
        {
            let state = self.state.lock();
            if state.pulling || state.conflict.is_some() {
                debug!(book = %self.meta.key, "push suppressed");
                return Ok(PushOutcome::Suppressed);
            }
        }
        if !self.ctx.config.enabled {
            return Err(SyncError::NotConfigured);
        }
        let failures_before = self.failures();
        let result = self.push_inner(delivery).await;
        self.settle(&result, failures_before);
        result
    }

    /// Applies the user's answer to an open conflict.
    pub async fn resolve_conflict(&self, choice: ConflictChoice) -> SyncResult<()> {
        let Some(record) = self.state.lock().conflict.take() else {
            return Ok(());
        };
        info!(book = %self.meta.key, ?choice, "conflict resolved");

        match choice {
            ConflictChoice::ApplyRemote => {
                let _guard = self.begin_pulling();
                let local_total = self.view.position().total_pages;
                let target = translator::from_remote(
                    record.remote.page,
                    local_total,
                    Some(record.remote.total_pages),
                    self.meta.layout,
                );
                self.navigate(target).await;
                self.state.lock().phase = SyncPhase::Synced;
                Ok(())
            }
            ConflictChoice::KeepLocal => {
                self.state.lock().phase = SyncPhase::Synced;
                if self.ctx.config.push_frequency == PushFrequency::Session {
                    return Ok(());
                }
                self.push(Delivery::Normal).await.map(|_| ())
            }
        }
    }

    /// Delivers any pending push now and waits for in-flight pushes.
    ///
    /// In session mode the current position is pushed. Returns true if a
    /// push ran.
    pub async fn force_sync(&self) -> SyncResult<bool> {
        if self.ctx.config.push_frequency == PushFrequency::Session {
            self.debouncer.cancel_pending();
            return self.push(Delivery::Normal).await.map(|o| o != PushOutcome::Suppressed);
        }
        if self.debouncer.flush_now().await {
            return Ok(true);
        }
        let _in_flight = self.push_lock.lock().await;
        Ok(false)
    }

    /// Flushes progress before the view goes away.
    ///
    /// In session mode exactly one push is performed and awaited; otherwise
    /// a pending debounced push is sent immediately. Writes use best-effort
    /// delivery.
    pub async fn close(&self) -> SyncResult<()> {
        let result = if !self.ctx.config.enabled {
            self.debouncer.cancel_pending();
            Ok(())
        } else {
            let pending = self.debouncer.cancel_pending();
            let must_push =
                pending || self.ctx.config.push_frequency == PushFrequency::Session;
            if must_push {
                self.push(Delivery::BestEffort).await.map(|_| ())
            } else {
                // Wait for a push that is already running.
                let _in_flight = self.push_lock.lock().await;
                Ok(())
            }
        };
        self.state.lock().conflict = None;
        result
    }

    /// Links the book to a catalog book chosen by the user.
    pub async fn link_manually(&self, remote_book_id: i64) -> SyncResult<i64> {
        let failures_before = self.failures();
        let link_id = match self.matcher.ensure_in_library(remote_book_id).await {
            Ok(link_id) => link_id,
            Err(e) => {
                self.report(&e, failures_before);
                return Err(e);
            }
        };
        info!(book = %self.meta.key, remote_book = remote_book_id, link_id, "linked manually");
        self.update_linkage(|linkage| *linkage = SyncLinkage::linked(link_id));
        self.state.lock().phase = SyncPhase::Idle;
        Ok(link_id)
    }

    /// Keeps the read session with the most progress and deletes the rest.
    pub async fn cleanup_duplicate_sessions(&self) -> SyncResult<CleanupReport> {
        let link_id = self.ensure_linked().await?;
        let sessions = self.ctx.api.list_read_sessions(link_id).await?;
        let Some((keep, delete)) = plan_cleanup(&sessions) else {
            return Ok(CleanupReport::default());
        };

        for id in &delete {
            self.ctx.api.delete_read_session(*id).await?;
        }
        info!(book = %self.meta.key, kept = keep.id, deleted = delete.len(), "removed duplicate read sessions");

        if self.state.lock().linkage.read_session_id != Some(keep.id) {
            let keep = keep.clone();
            self.update_linkage(|linkage| {
                linkage.read_session_id = Some(keep.id);
                linkage.read_started_at = keep.started_at;
                if keep.edition_id.is_some() {
                    linkage.edition_id = keep.edition_id;
                }
            });
        }
        Ok(CleanupReport {
            deleted: delete.len(),
            kept: Some(keep.id),
        })
    }

    fn begin_pulling(&self) -> PullingGuard<'_> {
        self.state.lock().pulling = true;
        PullingGuard { state: &self.state }
    }

    async fn pull_inner(&self) -> SyncResult<PullOutcome> {
        let link_id = self.ensure_linked().await?;
        self.state.lock().phase = SyncPhase::Checking;

        let user_book = self.ctx.api.user_book(link_id).await?;
        self.cache_remote(&user_book);

        let Some(session) = user_book.active_session().filter(|s| s.progress() > 0) else {
            self.state.lock().phase = SyncPhase::Synced;
            return Ok(PullOutcome::NoRemoteProgress);
        };

        let position = self.view.position();
        let remote_total = user_book.total_pages();
        let local = ProgressSnapshot::new(
            position.page_index.saturating_add(1),
            position.total_pages,
            position.updated_at,
        );
        let remote = ProgressSnapshot::new(
            session.progress(),
            remote_total.unwrap_or(position.total_pages),
            session.updated_at,
        );

        match conflict::resolve(self.ctx.config.strategy, local, remote) {
            Resolution::ApplyRemote => {
                let target = translator::from_remote(
                    session.progress(),
                    position.total_pages,
                    remote_total,
                    self.meta.layout,
                );
                info!(book = %self.meta.key, page_index = target, "applying remote progress");
                self.navigate(target).await;
                self.state.lock().phase = SyncPhase::Synced;
                Ok(PullOutcome::Applied { page_index: target })
            }
            Resolution::KeepLocal => {
                self.state.lock().phase = SyncPhase::Synced;
                Ok(PullOutcome::KeptLocal)
            }
            Resolution::AlreadySynced => {
                self.state.lock().phase = SyncPhase::Synced;
                Ok(PullOutcome::InSync)
            }
            Resolution::Prompt(record) => {
                info!(book = %self.meta.key, diff = record.diff(), "progress conflict");
                {
                    let mut state = self.state.lock();
                    state.conflict = Some(record.clone());
                    state.phase = SyncPhase::Conflict;
                }
                self.emit(SyncEvent::Notice(Notice::ConflictNeedsResolution {
                    book: self.meta.key.clone(),
                    record: record.clone(),
                }));
                Ok(PullOutcome::Conflict(record))
            }
        }
    }

    async fn push_inner(&self, delivery: Delivery) -> SyncResult<PushOutcome> {
        let link_id = self.ensure_linked().await?;
        let position = self.view.position();
        let linkage = self.linkage();

        let remote_page = translator::to_remote(
            position.page_index,
            position.total_pages,
            linkage.remote_total_pages,
            self.meta.layout,
        );
        let read = ReadInput {
            progress_pages: remote_page,
            edition_id: linkage.edition_id,
            started_at: linkage.read_started_at,
        };

        let api = &self.ctx.api;
        let session = match linkage.read_session_id {
            Some(session_id) => match api.update_read_session(session_id, read.clone(), delivery).await {
                Err(SyncError::StaleSession(reason)) => {
                    info!(book = %self.meta.key, session_id, %reason, "read session closed, starting a new one");
                    self.update_linkage(SyncLinkage::clear_session);
                    let read = ReadInput {
                        started_at: None,
                        ..read
                    };
                    api.create_read_session(link_id, fresh_session(read), delivery)
                        .await?
                }
                other => other?,
            },
            None => {
                api.create_read_session(link_id, fresh_session(read), delivery)
                    .await?
            }
        };

        self.update_linkage(|linkage| {
            linkage.read_session_id = Some(session.id);
            if session.edition_id.is_some() {
                linkage.edition_id = session.edition_id;
            }
            if session.started_at.is_some() {
                linkage.read_started_at = session.started_at;
            }
            linkage.last_pushed_at = Some(Utc::now());
        });
        self.state.lock().phase = SyncPhase::Synced;
        debug!(book = %self.meta.key, remote_page, session_id = session.id, "pushed progress");

        Ok(PushOutcome::Pushed {
            remote_page,
            session_id: session.id,
        })
    }

    async fn ensure_linked(&self) -> SyncResult<i64> {
        if let Some(link_id) = self.state.lock().linkage.remote_book_link_id {
            return Ok(link_id);
        }
        self.state.lock().phase = SyncPhase::Matching;
        match self.matcher.match_book(&self.meta).await? {
            Some(found) => {
                self.update_linkage(|linkage| *linkage = SyncLinkage::linked(found.link_id));
                Ok(found.link_id)
            }
            None => Err(SyncError::NoMatch(self.meta.title.clone())),
        }
    }

    /// Caches session, edition, start date and remote page count.
    fn cache_remote(&self, user_book: &UserBook) {
        let active = user_book.active_session();
        let edition_id = active
            .and_then(|s| s.edition_id)
            .or(user_book.edition.as_ref().map(|e| e.id));
        let remote_total = user_book.total_pages();

        let current = self.linkage();
        let mut next = current.clone();
        match active {
            Some(session) => {
                next.read_session_id = Some(session.id);
                next.read_started_at = session.started_at;
            }
            // The stored session is no longer active remotely.
            None => next.clear_session(),
        }
        if edition_id.is_some() {
            next.edition_id = edition_id;
        }
        if remote_total.is_some() {
            next.remote_total_pages = remote_total;
        }
        if next != current {
            self.update_linkage(|linkage| *linkage = next);
        }
    }

    fn update_linkage(&self, change: impl FnOnce(&mut SyncLinkage)) {
        let linkage = {
            let mut state = self.state.lock();
            change(&mut state.linkage);
            state.linkage.clone()
        };
        let saved = if linkage.is_linked() {
            self.ctx.store.save(&self.meta.key, &linkage)
        } else {
            self.ctx.store.clear(&self.meta.key)
        };
        if let Err(e) = saved {
            warn!(book = %self.meta.key, error = %e, "failed to persist linkage");
        }
        self.emit(SyncEvent::LinkageUpdated {
            book: self.meta.key.clone(),
            linkage,
        });
    }

    async fn navigate(&self, page_index: u32) {
        self.view.go_to_page(page_index);
        tokio::time::sleep(self.ctx.config.settle_delay).await;
    }

    fn schedule_push(&self) {
        let this = self.this.clone();
        self.debouncer.schedule(async move {
            let Some(book) = this.upgrade() else {
                return;
            };
            if let Err(e) = book.push(Delivery::Normal).await {
                debug!(book = %book.meta.key, error = %e, "debounced push failed");
            }
        });
    }

    async fn send_status_once(&self) {
        {
            let mut state = self.state.lock();
            if state.status_sent || !state.linkage.is_linked() {
                return;
            }
            state.status_sent = true;
        }
        self.send_status(ReadingStatus::CurrentlyReading).await;
    }

    fn spawn_finished_status(&self) {
        let this = self.this.clone();
        tokio::spawn(async move {
            if let Some(book) = this.upgrade() {
                book.send_status(ReadingStatus::Read).await;
            }
        });
    }

    async fn send_status(&self, status: ReadingStatus) {
        let Some(link_id) = self.state.lock().linkage.remote_book_link_id else {
            return;
        };
        let failures_before = self.failures();
        match self.ctx.api.update_status(link_id, status).await {
            Ok(()) => {
                info!(book = %self.meta.key, ?status, "reading status updated");
                self.notify_recovery();
            }
            Err(e) => self.report(&e, failures_before),
        }
    }

    fn failures(&self) -> u32 {
        self.ctx.gate.status().consecutive_failures
    }

    fn settle<T>(&self, result: &SyncResult<T>, failures_before: u32) {
        match result {
            Ok(_) => self.notify_recovery(),
            Err(e) => {
                self.state.lock().phase = SyncPhase::Error;
                self.report(e, failures_before);
            }
        }
    }

    fn report(&self, error: &SyncError, failures_before: u32) {
        let book = self.meta.key.clone();
        match error {
            SyncError::NotConfigured => return,
            SyncError::NoMatch(_) => {
                self.emit(SyncEvent::Notice(Notice::NoMatch { book }));
                return;
            }
            SyncError::InvalidLink(_) => {
                warn!(book = %book, error = %error, "remote link is gone, clearing linkage");
                self.update_linkage(SyncLinkage::reset);
            }
            _ => {}
        }
        if let Some(notice) = failure_notice(&book, error, &self.ctx.gate, failures_before) {
            self.emit(SyncEvent::Notice(notice));
        }
    }

    fn notify_recovery(&self) {
        if let Some(notice) = recovery_notice(&self.ctx.gate) {
            self.emit(SyncEvent::Notice(notice));
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error.
        let _ = self.ctx.events.send(event);
    }
}

fn fresh_session(read: ReadInput) -> ReadInput {
    ReadInput {
        started_at: Some(read.started_at.unwrap_or_else(|| Utc::now().date_naive())),
        ..read
    }
}

/// Splits sessions into the one to keep (most progress, earliest on ties)
/// and the ids to delete.
pub fn plan_cleanup(sessions: &[ReadSession]) -> Option<(&ReadSession, Vec<i64>)> {
    let keep = sessions
        .iter()
        .reduce(|best, s| if s.progress() > best.progress() { s } else { best })?;
    let delete = sessions
        .iter()
        .filter(|s| s.id != keep.id)
        .map(|s| s.id)
        .collect();
    Some((keep, delete))
}

impl std::fmt::Debug for BookSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookSync")
            .field("key", &self.meta.key)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
