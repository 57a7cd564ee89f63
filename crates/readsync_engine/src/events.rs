//! Events emitted toward the application, and the failure notification
//! policy.

use crate::conflict::ConflictRecord;
use crate::error::{ErrorKind, SyncError};
use crate::gate::FailureGate;
use crate::linkage::SyncLinkage;
use std::time::Duration;

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The credential was verified.
    Connected {
        /// Remote display name.
        username: String,
    },
    /// Sync is suspended by the failure gate.
    Disconnected {
        /// Time until a probe is admitted.
        retry_in: Duration,
    },
    /// The gate closed again after a successful probe.
    SyncRestored,
    /// Local and remote progress diverge; the user must choose.
    ConflictNeedsResolution {
        /// Local book identity.
        book: String,
        /// Both positions.
        record: ConflictRecord,
    },
    /// A sync attempt failed.
    SyncFailed {
        /// Local book identity.
        book: String,
        /// Error kind.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
    /// The stored linkage no longer exists remotely.
    InvalidLinkNeedsRematch {
        /// Local book identity.
        book: String,
    },
    /// Automatic matching found no acceptable candidate.
    NoMatch {
        /// Local book identity.
        book: String,
    },
}

impl Notice {
    /// Returns the text shown to the user.
    pub fn message(&self) -> String {
        match self {
            Notice::Connected { username } => format!("Connected as {}", username),
            Notice::Disconnected { retry_in } => {
                let secs = retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0);
                format!("Sync temporarily disabled, retry in {}s", secs.max(1))
            }
            Notice::SyncRestored => "Sync restored".to_string(),
            Notice::ConflictNeedsResolution { record, .. } => format!(
                "Reading position differs: local {} / remote {}",
                record.local_view().preview,
                record.remote_view().preview
            ),
            Notice::SyncFailed { message, .. } => format!("Sync failed: {}", message),
            Notice::InvalidLinkNeedsRematch { .. } => {
                "Linked book no longer exists, please match it again".to_string()
            }
            Notice::NoMatch { .. } => "No matching book found, please select it manually".to_string(),
        }
    }
}

/// An event broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Something to show the user.
    Notice(Notice),
    /// A linkage changed and was persisted.
    LinkageUpdated {
        /// Local book identity.
        book: String,
        /// New linkage.
        linkage: SyncLinkage,
    },
}

/// Decides which notice, if any, a failed operation produces.
///
/// `failures_before` is the gate's consecutive failure count when the
/// operation started, so an operation that failed more than once (an update
/// and its fallback) still counts as one step of the run.
///
/// Credential failures are always surfaced. Of a run of failed operations the
/// first is surfaced, the following ones are silent, and the one that opens
/// the gate is surfaced once as a disconnect. Local rejections are silent.
pub fn failure_notice(
    book: &str,
    error: &SyncError,
    gate: &FailureGate,
    failures_before: u32,
) -> Option<Notice> {
    let kind = error.kind();
    match kind {
        ErrorKind::CircuitOpen => None,
        ErrorKind::InvalidLink => Some(Notice::InvalidLinkNeedsRematch {
            book: book.to_string(),
        }),
        ErrorKind::AuthFailed => Some(Notice::SyncFailed {
            book: book.to_string(),
            kind,
            message: error.to_string(),
        }),
        _ => {
            let status = gate.status();
            if let Some(retry_in) = status.retry_in {
                return gate
                    .claim_disconnect_notice()
                    .then_some(Notice::Disconnected { retry_in });
            }
            (failures_before == 0).then(|| Notice::SyncFailed {
                book: book.to_string(),
                kind,
                message: error.to_string(),
            })
        }
    }
}

/// Returns the restored notice once after the gate recovers.
pub fn recovery_notice(gate: &FailureGate) -> Option<Notice> {
    gate.take_recovery().then_some(Notice::SyncRestored)
}
