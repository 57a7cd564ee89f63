//! Integration tests for the sync engine against the in-memory remote.

use chrono::NaiveDate;
use parking_lot::Mutex;
use readsync_engine::{
    BookMetadata, ConflictChoice, ErrorKind, GateState, LinkageStore, LocalPosition,
    MemoryLinkageStore, MockFailure, MockRemote, Notice, PullOutcome, PushFrequency, ReaderView,
    SyncConfig, SyncError, SyncEvent, SyncLinkage, SyncManager, SyncPhase, SyncStrategy,
};
use readsync_protocol::{
    Author, CatalogBook, CatalogEdition, Contribution, Operation, ReadingStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const TOKEN: &str = "secret";
const BOOK: &str = "book-1";

/// A reader view that records navigations.
struct TestView {
    position: Mutex<LocalPosition>,
    jumps: Mutex<Vec<u32>>,
}

impl TestView {
    fn new(page_index: u32, total_pages: u32) -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(LocalPosition::new(page_index, total_pages)),
            jumps: Mutex::new(Vec::new()),
        })
    }

    /// Moves the reader and returns the position to report.
    fn turn_to(&self, page_index: u32, section: Option<&str>) -> LocalPosition {
        let mut position = self.position.lock();
        position.page_index = page_index;
        position.section = section.map(str::to_string);
        position.clone()
    }
}

impl ReaderView for TestView {
    fn position(&self) -> LocalPosition {
        self.position.lock().clone()
    }

    fn go_to_page(&self, page_index: u32) {
        self.position.lock().page_index = page_index;
        self.jumps.lock().push(page_index);
    }
}

fn dune() -> CatalogBook {
    CatalogBook {
        id: 1,
        title: "Dune".into(),
        pages: Some(600),
        contributions: vec![Contribution {
            author: Author {
                name: "Frank Herbert".into(),
            },
        }],
        editions: vec![CatalogEdition {
            id: 11,
            isbn_10: Some("0441172717".into()),
            isbn_13: Some("9780441172719".into()),
            pages: Some(412),
        }],
    }
}

fn hobbit() -> CatalogBook {
    CatalogBook {
        id: 2,
        title: "The Hobbit".into(),
        pages: None,
        contributions: vec![Contribution {
            author: Author {
                name: "J. R. R. Tolkien".into(),
            },
        }],
        editions: Vec::new(),
    }
}

fn meta() -> BookMetadata {
    BookMetadata::new(BOOK, "Dune").with_author("Frank Herbert")
}

struct Harness {
    manager: Arc<SyncManager>,
    remote: MockRemote,
    store: Arc<MemoryLinkageStore>,
    events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        let remote = MockRemote::new(TOKEN);
        remote.add_book(dune());
        remote.add_book(hobbit());
        let store = Arc::new(MemoryLinkageStore::new());
        let manager = Arc::new(SyncManager::with_http(
            config,
            remote.clone(),
            store.clone(),
        ));
        let events = manager.subscribe();
        Self {
            manager,
            remote,
            store,
            events,
        }
    }

    /// Stores a linkage to a fresh library entry for Dune.
    fn link(&self, edition_id: Option<i64>) -> i64 {
        let link_id = self.remote.add_library_entry(1, edition_id);
        self.store.save(BOOK, &SyncLinkage::linked(link_id)).unwrap();
        link_id
    }

    fn notices(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let SyncEvent::Notice(notice) = event {
                notices.push(notice);
            }
        }
        notices
    }
}

fn config() -> SyncConfig {
    SyncConfig::new(TOKEN)
}

#[tokio::test(start_paused = true)]
async fn open_matches_by_isbn_and_marks_currently_reading() {
    let h = Harness::new(config());
    let view = TestView::new(0, 200);

    let book = h
        .manager
        .open_book(meta().with_isbn("978-0-441-17271-9"), view)
        .await
        .unwrap();

    let link_id = h.remote.library_entry_for(1).unwrap();
    assert_eq!(book.linkage().remote_book_link_id, Some(link_id));
    assert_eq!(h.store.load(BOOK).unwrap().unwrap().remote_book_link_id, Some(link_id));
    assert_eq!(book.phase(), SyncPhase::Synced);
    assert_eq!(h.remote.calls(Operation::InsertUserBook), 1);
    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 1);
    assert_eq!(
        h.remote.status_of(link_id),
        Some(ReadingStatus::CurrentlyReading.to_id())
    );
}

#[tokio::test(start_paused = true)]
async fn receive_strategy_applies_remote_progress() {
    let h = Harness::new(config().with_strategy(SyncStrategy::Receive));
    let link_id = h.link(Some(11));
    let session = h.remote.add_read(link_id, 206, None);
    let view = TestView::new(0, 200);

    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    // Half of 412 remote pages is half of 200 local pages.
    assert_eq!(*view.jumps.lock(), vec![99]);
    let linkage = book.linkage();
    assert_eq!(linkage.read_session_id, Some(session));
    assert_eq!(linkage.remote_total_pages, Some(412));
    assert_eq!(linkage.edition_id, Some(11));
    assert!(!book.is_pulling());
    assert_eq!(h.remote.progress_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn prompt_conflict_blocks_pushes_until_resolved() {
    let mut h = Harness::new(config());
    let link_id = h.link(Some(11));
    let session = h.remote.add_read(link_id, 300, None);
    let view = TestView::new(10, 200);

    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    assert_eq!(book.phase(), SyncPhase::Conflict);
    assert!(h
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::ConflictNeedsResolution { .. })));

    book.on_progress_changed(view.turn_to(10, None));
    assert!(!book.has_pending_push());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.progress_writes(), 0);

    book.resolve_conflict(ConflictChoice::KeepLocal).await.unwrap();
    assert!(book.conflict().is_none());
    assert_eq!(h.remote.calls(Operation::UpdateReadSession), 1);
    // Page 11 of 200 is 22.66 of 412.
    assert_eq!(h.remote.read(session).unwrap().progress_pages, Some(23));
}

#[tokio::test(start_paused = true)]
async fn apply_remote_choice_navigates() {
    let h = Harness::new(config());
    let link_id = h.link(Some(11));
    h.remote.add_read(link_id, 300, None);
    let view = TestView::new(10, 200);

    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    book.resolve_conflict(ConflictChoice::ApplyRemote).await.unwrap();

    assert_eq!(*view.jumps.lock(), vec![145]);
    assert_eq!(book.phase(), SyncPhase::Synced);
    assert_eq!(h.remote.progress_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn progress_events_during_pull_do_not_write() {
    let h = Harness::new(config());
    h.link(None);
    h.remote.set_latency(Duration::from_secs(1));
    let view = TestView::new(0, 200);

    let manager = h.manager.clone();
    let opening = {
        let view = view.clone();
        tokio::spawn(async move { manager.open_book(meta(), view).await })
    };
    tokio::task::yield_now().await;

    let book = h.manager.book(BOOK).unwrap();
    assert!(book.is_pulling());
    for page in 1..=5 {
        book.on_progress_changed(view.turn_to(page, None));
    }
    assert!(!book.has_pending_push());

    opening.await.unwrap().unwrap();
    assert!(!book.is_pulling());
    assert_eq!(h.remote.progress_writes(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.progress_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn page_mode_coalesces_rapid_changes() {
    let h = Harness::new(config());
    let link_id = h.link(None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    for page in 10..15 {
        book.on_progress_changed(view.turn_to(page, None));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(h.remote.progress_writes(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.remote.progress_writes(), 1);

    // Page 15 of 200 local pages is page 45 of 600 remote pages.
    let reads = h.remote.reads_for(link_id);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].progress_pages, Some(45));
    assert!(reads[0].started_at.is_some());
    assert_eq!(book.linkage().read_session_id, Some(reads[0].id));
}

#[tokio::test(start_paused = true)]
async fn chapter_mode_pushes_on_section_change() {
    let h = Harness::new(config().with_push_frequency(PushFrequency::Chapter));
    h.link(None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    book.on_progress_changed(view.turn_to(1, Some("ch1")));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.remote.progress_writes(), 1);

    for page in 2..6 {
        book.on_progress_changed(view.turn_to(page, Some("ch1")));
    }
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.remote.progress_writes(), 1);

    book.on_progress_changed(view.turn_to(20, Some("ch2")));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.remote.progress_writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn chapter_change_during_pull_is_pushed_after_it() {
    let h = Harness::new(config().with_push_frequency(PushFrequency::Chapter));
    let link_id = h.link(None);
    h.remote.set_latency(Duration::from_secs(1));
    let view = TestView::new(0, 200);

    let manager = h.manager.clone();
    let opening = {
        let view = view.clone();
        tokio::spawn(async move { manager.open_book(meta(), view).await })
    };
    tokio::task::yield_now().await;

    let book = h.manager.book(BOOK).unwrap();
    assert!(book.is_pulling());
    book.on_progress_changed(view.turn_to(30, Some("ch2")));
    opening.await.unwrap().unwrap();
    assert!(!book.has_pending_push());

    for page in 31..40 {
        book.on_progress_changed(view.turn_to(page, Some("ch2")));
    }
    assert!(book.has_pending_push());

    h.manager.close_book(BOOK).await.unwrap();
    assert_eq!(h.remote.progress_writes(), 1);
    // Page 40 of 200 local pages is page 120 of 600.
    assert_eq!(h.remote.reads_for(link_id)[0].progress_pages, Some(120));
}

#[tokio::test(start_paused = true)]
async fn session_mode_close_writes_exactly_once() {
    let h = Harness::new(config().with_push_frequency(PushFrequency::Session));
    let link_id = h.link(None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    for page in 1..=20 {
        book.on_progress_changed(view.turn_to(page, Some("ch1")));
    }
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.remote.progress_writes(), 0);

    h.manager.close_book(BOOK).await.unwrap();
    assert_eq!(h.remote.progress_writes(), 1);
    assert_eq!(h.remote.keepalive_calls(), 1);
    assert_eq!(h.remote.reads_for(link_id)[0].progress_pages, Some(63));
    assert!(h.manager.book(BOOK).is_none());
}

#[tokio::test(start_paused = true)]
async fn close_flushes_pending_push() {
    let h = Harness::new(config());
    h.link(None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    book.on_progress_changed(view.turn_to(7, None));
    assert!(book.has_pending_push());

    h.manager.close_book(BOOK).await.unwrap();
    assert_eq!(h.remote.progress_writes(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.progress_writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn force_sync_awaits_pending_push() {
    let h = Harness::new(config());
    h.link(None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    book.on_progress_changed(view.turn_to(3, None));
    assert!(h.manager.force_sync(BOOK).await.unwrap());
    assert_eq!(h.remote.progress_writes(), 1);
    assert!(!h.manager.force_sync(BOOK).await.unwrap());
    assert!(!h.manager.force_sync("unknown").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn finished_session_falls_back_to_new_session() {
    let h = Harness::new(config());
    let link_id = h.link(None);
    let old = h.remote.add_read(link_id, 5, None);
    let view = TestView::new(4, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    assert_eq!(book.linkage().read_session_id, Some(old));

    h.remote.finish_read(old);
    book.on_progress_changed(view.turn_to(9, None));
    assert!(h.manager.force_sync(BOOK).await.unwrap());

    assert_eq!(h.remote.calls(Operation::UpdateReadSession), 1);
    assert_eq!(h.remote.calls(Operation::InsertReadSession), 1);
    let linkage = book.linkage();
    let new = linkage.read_session_id.unwrap();
    assert_ne!(new, old);
    let session = h.remote.read(new).unwrap();
    assert_eq!(session.progress_pages, Some(30));

    // The new session starts today, not when the finished one did.
    assert!(session.started_at.is_some());
    assert_ne!(session.started_at, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert_eq!(linkage.read_started_at, session.started_at);
}

#[tokio::test(start_paused = true)]
async fn failed_fallback_is_reported_as_first_failure() {
    let mut h = Harness::new(config());
    let link_id = h.link(None);
    let old = h.remote.add_read(link_id, 5, None);
    let view = TestView::new(4, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    h.notices();

    h.remote.finish_read(old);
    h.remote
        .push_failure_for(Operation::InsertReadSession, MockFailure::Status(503));
    book.on_progress_changed(view.turn_to(9, None));
    assert!(h.manager.force_sync(BOOK).await.unwrap());

    // Both the update and its fallback failed.
    assert_eq!(h.manager.gate_status().consecutive_failures, 2);
    assert_eq!(book.phase(), SyncPhase::Error);
    let notices = h.notices();
    assert_eq!(notices.len(), 1);
    assert!(matches!(
        notices[0],
        Notice::SyncFailed {
            kind: ErrorKind::ServerError,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn deleted_session_falls_back_and_stays_linked() {
    let h = Harness::new(config());
    let link_id = h.link(None);
    let old = h.remote.add_read(link_id, 3, None);
    let view = TestView::new(2, 200);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();

    h.remote.delete_read(old);
    book.on_progress_changed(view.turn_to(5, None));
    assert!(h.manager.force_sync(BOOK).await.unwrap());

    assert_eq!(h.remote.calls(Operation::InsertReadSession), 1);
    let linkage = book.linkage();
    assert_eq!(linkage.remote_book_link_id, Some(link_id));
    let new = linkage.read_session_id.unwrap();
    assert_ne!(new, old);
    assert_eq!(h.remote.read(new).unwrap().progress_pages, Some(18));
}

#[tokio::test(start_paused = true)]
async fn invalid_link_clears_linkage_and_requests_rematch() {
    let mut h = Harness::new(config());
    h.store.save(BOOK, &SyncLinkage::linked(4242)).unwrap();
    let view = TestView::new(0, 200);

    let book = h.manager.open_book(meta(), view).await.unwrap();

    assert_eq!(book.phase(), SyncPhase::Error);
    assert!(!book.linkage().is_linked());
    assert!(h.store.load(BOOK).unwrap().is_none());
    assert!(h
        .notices()
        .contains(&Notice::InvalidLinkNeedsRematch { book: BOOK.into() }));
}

#[tokio::test(start_paused = true)]
async fn no_match_then_manual_link() {
    let mut h = Harness::new(config());
    let view = TestView::new(0, 100);
    let meta = BookMetadata::new(BOOK, "Completely Unknown Book");

    let book = h.manager.open_book(meta, view).await.unwrap();
    assert!(h.notices().contains(&Notice::NoMatch { book: BOOK.into() }));
    assert!(!book.linkage().is_linked());

    let link_id = book.link_manually(2).await.unwrap();
    assert_eq!(h.remote.library_entry_for(2), Some(link_id));
    assert_eq!(
        h.store.load(BOOK).unwrap().unwrap().remote_book_link_id,
        Some(link_id)
    );
}

#[tokio::test(start_paused = true)]
async fn cleanup_keeps_session_with_most_progress() {
    let h = Harness::new(config());
    let link_id = h.link(None);
    let first = h.remote.add_read(link_id, 40, None);
    let second = h.remote.add_read(link_id, 120, None);
    let third = h.remote.add_read(link_id, 80, None);
    let view = TestView::new(0, 200);
    let book = h.manager.open_book(meta(), view).await.unwrap();

    let report = book.cleanup_duplicate_sessions().await.unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(report.kept, Some(second));
    let remaining: Vec<i64> = h.remote.reads_for(link_id).iter().map(|r| r.id).collect();
    assert_eq!(remaining, vec![second]);
    assert!(h.remote.read(first).is_none());
    assert!(h.remote.read(third).is_none());
    assert_eq!(book.linkage().read_session_id, Some(second));
}

#[tokio::test(start_paused = true)]
async fn gate_opens_after_three_failures_and_recovers() {
    let mut h = Harness::new(config());
    for _ in 0..3 {
        h.remote.push_failure(MockFailure::Status(503));
    }

    for _ in 0..3 {
        assert_eq!(
            h.manager.connect().await.unwrap_err().kind(),
            ErrorKind::ServerError
        );
    }
    assert_eq!(h.manager.gate_status().state, GateState::Open);

    let rejected = h.manager.connect().await.unwrap_err();
    assert!(matches!(rejected, SyncError::CircuitOpen { .. }));
    assert_eq!(h.remote.total_calls(), 3);

    let notices = h.notices();
    assert_eq!(notices.len(), 2);
    assert!(matches!(notices[0], Notice::SyncFailed { .. }));
    assert_eq!(notices[1].message(), "Sync temporarily disabled, retry in 60s");

    tokio::time::advance(Duration::from_secs(60)).await;
    let user = h.manager.connect().await.unwrap();
    assert_eq!(user.username, "reader");
    assert_eq!(h.manager.gate_status().state, GateState::Closed);
    assert_eq!(h.manager.gate_status().consecutive_failures, 0);
    assert_eq!(
        h.notices(),
        vec![
            Notice::Connected {
                username: "reader".into()
            },
            Notice::SyncRestored
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn auth_failures_never_open_the_gate() {
    let remote = MockRemote::new("the-real-token");
    let store = Arc::new(MemoryLinkageStore::new());
    let manager = SyncManager::with_http(SyncConfig::new("wrong"), remote.clone(), store);

    for _ in 0..5 {
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }
    assert_eq!(manager.gate_status().state, GateState::Closed);
    assert_eq!(manager.gate_status().consecutive_failures, 0);
    assert_eq!(remote.total_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn finished_status_is_sent_once() {
    let h = Harness::new(config());
    let link_id = h.link(None);
    let view = TestView::new(0, 100);
    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 1);

    book.on_progress_changed(view.turn_to(99, None));
    book.on_progress_changed(view.turn_to(98, None));
    book.on_progress_changed(view.turn_to(99, None));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 2);
    assert_eq!(h.remote.status_of(link_id), Some(ReadingStatus::Read.to_id()));
}

#[tokio::test(start_paused = true)]
async fn finished_status_waits_for_a_link() {
    let h = Harness::new(config());
    let view = TestView::new(0, 100);
    let meta = BookMetadata::new(BOOK, "Completely Unknown Book");
    let book = h.manager.open_book(meta, view.clone()).await.unwrap();

    book.on_progress_changed(view.turn_to(99, None));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 0);

    let link_id = book.link_manually(2).await.unwrap();
    book.on_progress_changed(view.turn_to(99, None));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 1);
    assert_eq!(h.remote.status_of(link_id), Some(ReadingStatus::Read.to_id()));
}

#[tokio::test(start_paused = true)]
async fn currently_reading_is_sent_when_pull_fails() {
    let h = Harness::new(config());
    h.link(None);
    h.remote
        .push_failure_for(Operation::UserBook, MockFailure::Status(503));
    let view = TestView::new(0, 100);

    let book = h.manager.open_book(meta(), view).await.unwrap();

    assert_eq!(book.phase(), SyncPhase::Error);
    assert_eq!(h.remote.calls(Operation::UserBook), 1);
    assert_eq!(h.remote.calls(Operation::UpdateUserBook), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_sync_does_nothing() {
    let remote = MockRemote::new(TOKEN);
    let store = Arc::new(MemoryLinkageStore::new());
    let manager = SyncManager::with_http(SyncConfig::default(), remote.clone(), store);

    let view = TestView::new(0, 100);
    let result = manager.open_book(meta(), view).await;
    assert!(matches!(result, Err(SyncError::NotConfigured)));
    assert!(matches!(manager.connect().await, Err(SyncError::NotConfigured)));
    assert_eq!(remote.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_strategy_applies_only_newer_remote() {
    use chrono::{TimeZone, Utc};

    let h = Harness::new(config().with_strategy(SyncStrategy::Silent));
    let link_id = h.link(None);
    let remote_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single();
    h.remote.add_read(link_id, 150, remote_at);

    let view = TestView::new(10, 200);
    if let Some(at) = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single() {
        view.position.lock().updated_at = Some(at);
    }

    let book = h.manager.open_book(meta(), view.clone()).await.unwrap();
    assert!(view.jumps.lock().is_empty());
    assert_eq!(book.phase(), SyncPhase::Synced);

    // Local is older this time.
    if let Some(at) = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).single() {
        view.position.lock().updated_at = Some(at);
    }
    let outcome = book.pull().await.unwrap();
    assert_eq!(outcome, PullOutcome::Applied { page_index: 49 });
}
