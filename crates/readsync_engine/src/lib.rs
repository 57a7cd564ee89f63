//! # readsync Engine
//!
//! Bidirectional reading-progress sync between a local reader and a remote
//! reading tracker.
//!
//! This crate provides:
//! - Failure gate (circuit breaker) shared by every remote call
//! - Sliding-window request throttle
//! - Remote API client with a seven-code error taxonomy
//! - Progress translation between independent paginations
//! - Book matching by ISBN, then by title and author
//! - Conflict resolution per sync strategy
//! - Per-book state machine with debounced pushes
//! - Lifecycle manager with a force-sync registry
//!
//! ## Architecture
//!
//! Every remote call runs through the same pipeline:
//! 1. Gate admission (rejects locally while the gate is open)
//! 2. Throttle delay (never rejects)
//! 3. Credential check
//! 4. HTTP POST and response classification
//! 5. Outcome reported back to the gate
//!
//! ## Key Invariants
//!
//! - A pull finishes before any push on the same book
//! - An open conflict suppresses pushes until resolved
//! - Only the most recent pending push survives the debounce window
//! - Local rejections never count toward the gate

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod book;
mod client;
mod config;
mod conflict;
mod error;
mod events;
mod gate;
mod http;
mod linkage;
mod manager;
mod matcher;
mod mock;
mod scheduler;
mod throttle;
mod translator;

pub use book::{
    plan_cleanup, BookSync, CleanupReport, LocalPosition, PullOutcome, PushOutcome, ReaderView,
    SyncPhase,
};
pub use client::{Delivery, RemoteApi, RemoteClient};
pub use config::{
    GateConfig, PushFrequency, SyncConfig, SyncStrategy, DEFAULT_ENDPOINT, DEFAULT_RATE_LIMIT,
    MAX_RATE_LIMIT,
};
pub use conflict::{
    resolve, ConflictChoice, ConflictRecord, ProgressSnapshot, Resolution, SnapshotView,
    CONFLICT_THRESHOLD,
};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use events::{failure_notice, recovery_notice, Notice, SyncEvent};
pub use gate::{Admission, FailureGate, GateState, GateStatus};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use linkage::{JsonFileLinkageStore, LinkageStore, MemoryLinkageStore, SyncLinkage};
pub use manager::{BookRegistry, SyncContext, SyncManager};
pub use matcher::{
    best_candidate, score, similarity, BookMatch, BookMatcher, BookMetadata, MatchCandidate,
    MatchMethod, ACCEPT_SCORE,
};
pub use mock::{MockFailure, MockRemote};
pub use scheduler::Debouncer;
pub use throttle::RequestThrottle;
pub use translator::{completion, from_remote, to_remote, Layout};
