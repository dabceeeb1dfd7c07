//! Error types.
//!
//! `TransportError` is what a channel reports. `SyncError` is the taxonomy the
//! feed store, composer and authenticator surface to their callers. Stream
//! degradation is never an `Err`; see `SubscriptionNotice`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from the request/response and streaming channels.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Missing, expired or rejected credential.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Non-success HTTP status other than 401/403.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (DNS, TCP, TLS, socket I/O, timeouts).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with GraphQL errors.
    #[error("GraphQL error: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    /// The peer broke the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The streaming handshake was refused.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// No frame, not even a keep-alive, arrived in time.
    #[error("no keep-alive within {0:?}")]
    KeepaliveTimeout(Duration),

    /// The stream ended.
    #[error("stream closed")]
    Closed,

    /// A payload did not match the expected shape.
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Errors surfaced synchronously to the caller of a feed, composer or login operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or rejected credential on a request.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// `load_older_page` was called while a previous call is still in flight.
    #[error("an older page is already being loaded")]
    Busy,

    /// Any other request-channel failure. Never retried automatically.
    #[error("request failed: {reason}")]
    RequestFailed { reason: String },

    /// `load_older_page` was called before any initial window.
    #[error("no initial window has been loaded")]
    NotLoaded,

    /// The last continuation marker says there is nothing older.
    #[error("no older messages remain")]
    NoOlderPage,
}

impl SyncError {
    /// Returns true if repeating the same call later can succeed without the
    /// caller changing anything (e.g. logging in again).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy | Self::RequestFailed { .. } => true,
            Self::Unauthorized { .. } | Self::NotLoaded | Self::NoOlderPage => false,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized { reason } => Self::Unauthorized { reason },
            other => Self::RequestFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Errors from persisting the credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to persist credential at {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}")]
    Invalid { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_transport_error_keeps_its_kind() {
        let err: SyncError = TransportError::unauthorized("token expired").into();
        assert!(matches!(err, SyncError::Unauthorized { ref reason } if reason == "token expired"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_transport_errors_become_request_failed() {
        let err: SyncError = TransportError::GraphQl(vec!["Invalid room ID".into(), "boom".into()]).into();
        match err {
            SyncError::RequestFailed { reason } => {
                assert_eq!(reason, "GraphQL error: Invalid room ID; boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn busy_is_retryable() {
        assert!(SyncError::Busy.is_retryable());
        assert!(!SyncError::NoOlderPage.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = TransportError::Http { status: 502, body: "bad gateway".into() };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
