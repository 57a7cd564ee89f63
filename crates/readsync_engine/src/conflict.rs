//! Conflict resolution between local and remote progress.

use crate::config::SyncStrategy;
use chrono::{DateTime, Utc};

/// Percentage difference above which the prompt policy asks the user.
pub const CONFLICT_THRESHOLD: f64 = 0.05;

/// A position in one side's own pagination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// 1-based page number.
    pub page: u32,
    /// Total pages, at least 1.
    pub total_pages: u32,
    /// When this position was recorded.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Creates a snapshot; `total_pages` is raised to at least 1.
    pub fn new(page: u32, total_pages: u32, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            page,
            total_pages: total_pages.max(1),
            timestamp,
        }
    }

    /// Returns completion in `[0, 1]`.
    pub fn percentage(&self) -> f64 {
        (f64::from(self.page) / f64::from(self.total_pages)).clamp(0.0, 1.0)
    }

    /// Returns a display view of this snapshot.
    pub fn view(&self) -> SnapshotView {
        SnapshotView {
            preview: format!(
                "page {} of {} ({:.0}%)",
                self.page,
                self.total_pages,
                self.percentage() * 100.0
            ),
            timestamp: self.timestamp,
        }
    }
}

/// What the user is shown for one side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotView {
    /// Short human-readable position.
    pub preview: String,
    /// When the position was recorded.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A divergence awaiting user choice.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    /// Local position.
    pub local: ProgressSnapshot,
    /// Remote position.
    pub remote: ProgressSnapshot,
}

impl ConflictRecord {
    /// Returns `|remote% - local%|`.
    pub fn diff(&self) -> f64 {
        diff(&self.local, &self.remote)
    }

    /// Returns the local side for display.
    pub fn local_view(&self) -> SnapshotView {
        self.local.view()
    }

    /// Returns the remote side for display.
    pub fn remote_view(&self) -> SnapshotView {
        self.remote.view()
    }
}

/// Outcome of comparing local and remote progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Navigate to the remote position.
    ApplyRemote,
    /// Keep the local position.
    KeepLocal,
    /// Ask the user.
    Prompt(ConflictRecord),
    /// Positions agree closely enough.
    AlreadySynced,
}

/// The user's answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Navigate to the remote position.
    ApplyRemote,
    /// Keep the local position.
    KeepLocal,
}

/// Returns `|remote% - local%|`.
pub fn diff(local: &ProgressSnapshot, remote: &ProgressSnapshot) -> f64 {
    (remote.percentage() - local.percentage()).abs()
}

/// Decides what to do with a remote position under a strategy.
pub fn resolve(
    strategy: SyncStrategy,
    local: ProgressSnapshot,
    remote: ProgressSnapshot,
) -> Resolution {
    match strategy {
        SyncStrategy::Send => Resolution::KeepLocal,
        SyncStrategy::Receive => Resolution::ApplyRemote,
        SyncStrategy::Silent => match (remote.timestamp, local.timestamp) {
            (Some(remote_at), Some(local_at)) if remote_at > local_at => Resolution::ApplyRemote,
            (Some(_), None) => Resolution::ApplyRemote,
            _ => Resolution::KeepLocal,
        },
        SyncStrategy::Prompt => {
            if diff(&local, &remote) > CONFLICT_THRESHOLD {
                Resolution::Prompt(ConflictRecord { local, remote })
            } else {
                Resolution::AlreadySynced
            }
        }
    }
}
