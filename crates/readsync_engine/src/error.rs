//! Error types for the sync engine.

use readsync_protocol::{EmbeddedError, ProtocolError, RemoteErrorCode};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Classification of a failure, used by the failure gate and the
/// notification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing credential.
    AuthFailed,
    /// The remote throttled us.
    RateLimited,
    /// The remote answered with a 5xx status.
    ServerError,
    /// Transport-level failure.
    NetworkError,
    /// Any other remote logical error.
    GraphqlError,
    /// Rejected locally by the open failure gate.
    CircuitOpen,
    /// The stored linkage no longer exists remotely.
    InvalidLink,
}

impl ErrorKind {
    /// Returns true if this failure counts toward opening the gate.
    pub fn counts_toward_gate(&self) -> bool {
        !matches!(self, ErrorKind::AuthFailed | ErrorKind::CircuitOpen)
    }

    /// Stable identifier, as shown in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::GraphqlError => "GRAPHQL_ERROR",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::InvalidLink => "INVALID_LINK",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Credential missing or rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The remote throttled the request.
    #[error("rate limited by remote")]
    RateLimited {
        /// Delay suggested by the remote.
        retry_after: Option<Duration>,
    },

    /// The remote answered with a server error.
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status.
        status: u16,
        /// Response excerpt.
        message: String,
    },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Remote logical error.
    #[error("remote error: {0}")]
    Graphql(String),

    /// Rejected locally while the failure gate is open.
    #[error("sync temporarily disabled, retry in {}s", retry_in.as_secs())]
    CircuitOpen {
        /// Time until a probe is admitted.
        retry_in: Duration,
    },

    /// The stored linkage no longer exists remotely.
    #[error("remote link is no longer valid: {0}")]
    InvalidLink(String),

    /// The read session being updated is finished or gone.
    #[error("read session is no longer active: {0}")]
    StaleSession(String),

    /// Malformed request or response.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Sync is disabled in the configuration.
    #[error("sync is not enabled")]
    NotConfigured,

    /// No acceptable remote match for the local book.
    #[error("no remote match for {0:?}")]
    NoMatch(String),

    /// Linkage persistence failed.
    #[error("linkage store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Returns the taxonomy code of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AuthFailed(_) => ErrorKind::AuthFailed,
            SyncError::RateLimited { .. } => ErrorKind::RateLimited,
            SyncError::ServerError { .. } => ErrorKind::ServerError,
            SyncError::Network(_) => ErrorKind::NetworkError,
            SyncError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            SyncError::InvalidLink(_) => ErrorKind::InvalidLink,
            SyncError::Graphql(_)
            | SyncError::StaleSession(_)
            | SyncError::Protocol(_)
            | SyncError::NotConfigured
            | SyncError::NoMatch(_)
            | SyncError::Store(_) => ErrorKind::GraphqlError,
        }
    }

    /// Returns true if the next scheduled cycle may succeed without user
    /// action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::ServerError { .. } | SyncError::RateLimited { .. }
        )
    }

    /// Returns true if this error came from the remote rather than from a
    /// local precondition.
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            SyncError::CircuitOpen { .. }
                | SyncError::NotConfigured
                | SyncError::NoMatch(_)
                | SyncError::Store(_)
        )
    }

    /// Classifies an HTTP status that is not a success.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message: String = body.chars().take(200).collect();
        match status {
            401 | 403 => SyncError::AuthFailed(format!("HTTP {}", status)),
            429 => SyncError::RateLimited { retry_after },
            500..=599 => SyncError::ServerError { status, message },
            _ => SyncError::Graphql(format!("HTTP {}: {}", status, message)),
        }
    }
}

impl From<EmbeddedError> for SyncError {
    fn from(error: EmbeddedError) -> Self {
        match error.code {
            RemoteErrorCode::Unauthorized => SyncError::AuthFailed(error.message),
            RemoteErrorCode::RateLimited => SyncError::RateLimited { retry_after: None },
            RemoteErrorCode::NotFound => SyncError::InvalidLink(error.message),
            RemoteErrorCode::SessionClosed => SyncError::StaleSession(error.message),
            RemoteErrorCode::Other => SyncError::Graphql(error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(SyncError::from_status(401, "", None).kind(), ErrorKind::AuthFailed);
        assert_eq!(SyncError::from_status(429, "", None).kind(), ErrorKind::RateLimited);
        assert_eq!(SyncError::from_status(502, "bad gateway", None).kind(), ErrorKind::ServerError);
        assert_eq!(SyncError::from_status(400, "bad", None).kind(), ErrorKind::GraphqlError);
    }

    #[test]
    fn gate_counting() {
        assert!(!ErrorKind::AuthFailed.counts_toward_gate());
        assert!(!ErrorKind::CircuitOpen.counts_toward_gate());
        assert!(ErrorKind::RateLimited.counts_toward_gate());
        assert!(ErrorKind::InvalidLink.counts_toward_gate());
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::from_status(503, "", None).is_retryable());
        assert!(!SyncError::AuthFailed("expired".into()).is_retryable());
        assert!(!SyncError::InvalidLink("gone".into()).is_retryable());
        assert!(!SyncError::CircuitOpen {
            retry_in: Duration::from_secs(5)
        }
        .is_retryable());
    }

    #[test]
    fn embedded_errors_map_to_taxonomy() {
        let err: SyncError = EmbeddedError::new(RemoteErrorCode::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::InvalidLink);

        let err: SyncError = EmbeddedError::new(RemoteErrorCode::SessionClosed, "done").into();
        assert!(matches!(err, SyncError::StaleSession(_)));
        assert_eq!(err.kind(), ErrorKind::GraphqlError);
    }

    #[test]
    fn error_display() {
        let err = SyncError::CircuitOpen {
            retry_in: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "sync temporarily disabled, retry in 60s");
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "CIRCUIT_OPEN");
    }
}
