//! Error taxonomy for social-sync.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the remote store or persisting
/// sync state.
///
/// Retry and abandonment decisions are made by inspecting the variant,
/// never the message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The remote store could not be reached. Transient.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote store refused the request (validation, permissions).
    /// Permanent.
    #[error("remote rejected: {0}")]
    RemoteRejected(String),

    /// The remote store asked the client to slow down. Transient.
    #[error("rate limited")]
    RateLimited {
        /// Backoff hint supplied by the remote side, if any.
        retry_after: Option<Duration>,
    },

    /// A pagination cursor was invalidated by a concurrent refresh.
    #[error("stale pagination cursor")]
    StaleCursor,

    /// A payload could not be encoded, decoded, or persisted locally.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_) | SyncError::RateLimited { .. }
        )
    }

    /// Backoff hint carried by the error, if any.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::RemoteRejected("missing field".into());
        assert_eq!(err.to_string(), "remote rejected: missing field");
    }

    #[test]
    fn transient_classification() {
        assert!(SyncError::NetworkUnavailable("down".into()).is_transient());
        assert!(SyncError::RateLimited { retry_after: None }.is_transient());
        assert!(!SyncError::RemoteRejected("no".into()).is_transient());
        assert!(!SyncError::StaleCursor.is_transient());
        assert!(!SyncError::Serialization("bad".into()).is_transient());
    }

    #[test]
    fn retry_hint_only_from_rate_limit() {
        let hinted = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(hinted.retry_hint(), Some(Duration::from_secs(7)));
        assert_eq!(SyncError::NetworkUnavailable("x".into()).retry_hint(), None);
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
