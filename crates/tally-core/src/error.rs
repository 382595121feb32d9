//! Error types for tally-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::merge::MergeError;
use crate::store::RemoteError;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote store unreachable, offline, or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Expired session, permission denied, or unauthenticated request
    #[error("Session error: {0}")]
    Session(String),

    /// Session token rejected during refresh
    #[error("Session token is invalid: {0}")]
    TokenInvalid(String),

    /// Session token refresh failed for a reason other than an invalid token
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Local store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote store rejected or mangled a request
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Another sync cycle holds the single-flight guard
    #[error("Already syncing")]
    Busy,

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Three-way merge rejected its input
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether a sync cycle that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::TokenRefresh(_) => true,
            Self::Http(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }

    /// Whether this error invalidates the current session.
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::Session(_) | Self::TokenInvalid(_))
    }
}

impl From<AuthError> for Error {
    /// Auth errors surface while refreshing the session token: an invalid
    /// token is fatal, anything transient is retried with the cycle.
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::TokenInvalid(message) => Self::TokenInvalid(message),
            AuthError::PermissionDenied(message) => {
                Self::Session(format!("permission denied: {message}"))
            }
            AuthError::Unauthenticated => Self::Session("not signed in".to_string()),
            AuthError::Network(message) | AuthError::Other(message) => Self::TokenRefresh(message),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::PermissionDenied(_) | RemoteError::Unauthenticated(_) => {
                Self::Session(error.to_string())
            }
            RemoteError::Network(_) | RemoteError::Timeout(_) => Self::Network(error.to_string()),
            RemoteError::Malformed(_) | RemoteError::Other(_) => Self::Remote(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_errors() {
        assert!(Error::Network("offline".into()).is_retryable());
        assert!(Error::TokenRefresh("503".into()).is_retryable());
        assert!(!Error::Session("expired".into()).is_retryable());
        assert!(!Error::Storage("disk full".into()).is_retryable());
        assert!(!Error::Busy.is_retryable());
    }

    #[test]
    fn classifies_session_errors() {
        assert!(Error::Session("permission denied".into()).is_session());
        assert!(Error::TokenInvalid("revoked".into()).is_session());
        assert!(!Error::TokenRefresh("timeout".into()).is_session());
        assert!(!Error::Network("offline".into()).is_session());
    }

    #[test]
    fn auth_errors_map_onto_refresh_policy() {
        assert!(Error::from(AuthError::TokenInvalid("revoked".into())).is_session());
        assert!(Error::from(AuthError::Unauthenticated).is_session());
        assert!(Error::from(AuthError::Network("dns".into())).is_retryable());
        assert!(Error::from(AuthError::Other("500".into())).is_retryable());
    }

    #[test]
    fn remote_errors_map_onto_sync_policy() {
        assert!(Error::from(RemoteError::PermissionDenied("rules".into())).is_session());
        assert!(Error::from(RemoteError::Network("offline".into())).is_retryable());
        let timeout = Error::from(RemoteError::Timeout(std::time::Duration::from_secs(30)));
        assert!(timeout.is_retryable());
        assert!(!Error::from(RemoteError::Malformed("books".into())).is_retryable());
    }
}
