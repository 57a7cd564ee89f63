//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The response body was not a valid envelope.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The envelope carried neither data nor errors.
    #[error("response carried no data")]
    EmptyResponse,
}

/// Remote error codes recognized in response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// Credential missing, expired or rejected.
    Unauthorized,
    /// The remote throttled the request.
    RateLimited,
    /// The referenced library entry does not exist.
    NotFound,
    /// The referenced read session is finished or gone.
    SessionClosed,
    /// Any other logical error.
    Other,
}

impl RemoteErrorCode {
    /// Classifies a top-level GraphQL error.
    ///
    /// Only credential and throttling problems are recognized here. A
    /// top-level "not found" usually means a schema or validation problem,
    /// never a missing library entry.
    pub fn from_graphql(code: Option<&str>, message: &str) -> Self {
        match Self::classify(code, message) {
            code @ (Self::Unauthorized | Self::RateLimited) => code,
            _ => Self::Other,
        }
    }

    /// Classifies an error message reported by a mutation or lookup payload.
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        let code = code.map(str::to_ascii_lowercase);
        let message = message.to_ascii_lowercase();

        match code.as_deref() {
            Some("invalid-jwt" | "invalid-headers" | "access-denied" | "unauthorized") => {
                return Self::Unauthorized
            }
            Some("rate-limited" | "too-many-requests") => return Self::RateLimited,
            Some("not-found") => return Self::NotFound,
            _ => {}
        }

        if message.contains("unauthorized")
            || message.contains("not authorized")
            || message.contains("jwt")
        {
            Self::Unauthorized
        } else if message.contains("rate limit")
            || message.contains("throttled")
            || message.contains("too many requests")
        {
            Self::RateLimited
        } else if message.contains("finished") {
            Self::SessionClosed
        } else if message.contains("not found") || message.contains("does not exist") {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// An error the remote embedded inside an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedError {
    /// Classified code.
    pub code: RemoteErrorCode,
    /// Message as reported by the remote.
    pub message: String,
}

impl EmbeddedError {
    /// Creates an embedded error, classifying the message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: RemoteErrorCode::classify(None, &message),
            message,
        }
    }

    /// Creates an embedded error with an explicit code.
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
