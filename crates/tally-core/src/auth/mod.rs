//! Auth seam consumed by the sync engine.
//!
//! The engine never signs anyone in. It asks an [`AuthProvider`] for the live
//! session, forces a token refresh before every pull, and signs out when the
//! remote store rejects the session.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{normalize_text_option, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    /// Unix seconds; `None` for tokens without a known expiry
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Session token is invalid: {0}")]
    TokenInvalid(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not signed in")]
    Unauthenticated,
    #[error("Auth service unreachable: {0}")]
    Network(String),
    #[error("Auth error: {0}")]
    Other(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Source of the signed-in identity.
pub trait AuthProvider: Send + Sync + 'static {
    /// The live session, if any. Must not block.
    fn current_session(&self) -> Option<AuthSession>;

    /// Force a token refresh and return the refreshed session.
    fn refresh_session(&self) -> impl Future<Output = AuthResult<AuthSession>> + Send;

    /// Drop the session. Local data is left alone.
    fn sign_out(&self) -> impl Future<Output = AuthResult<()>> + Send;
}

/// Auth provider backed by a pre-issued bearer token.
///
/// Refreshing cannot mint a new token; it re-validates the stored one and
/// reports an expired token as invalid so the engine forces a sign-out.
pub struct StaticTokenAuth {
    session: Mutex<Option<AuthSession>>,
}

impl StaticTokenAuth {
    pub fn new(
        access_token: impl Into<String>,
        user_id: impl Into<String>,
        expires_at: Option<i64>,
    ) -> AuthResult<Self> {
        let access_token = normalize_text_option(Some(access_token.into()))
            .ok_or_else(|| AuthError::Other("access token must not be empty".to_string()))?;
        let user_id = normalize_text_option(Some(user_id.into()))
            .ok_or_else(|| AuthError::Other("user id must not be empty".to_string()))?;

        Ok(Self {
            session: Mutex::new(Some(AuthSession {
                access_token,
                expires_at,
                user: AuthUser {
                    id: user_id,
                    email: None,
                },
            })),
        })
    }

    /// A provider with nobody signed in.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    fn stored(&self) -> Option<AuthSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for StaticTokenAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticTokenAuth")
            .field("session", &self.stored())
            .finish()
    }
}

impl AuthProvider for StaticTokenAuth {
    fn current_session(&self) -> Option<AuthSession> {
        self.stored().filter(|session| !session.is_expired())
    }

    async fn refresh_session(&self) -> AuthResult<AuthSession> {
        let session = self.stored().ok_or(AuthError::Unauthenticated)?;
        if session.is_expired() {
            return Err(AuthError::TokenInvalid("access token has expired".to_string()));
        }
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("Signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "secret-access-token".to_string(),
            expires_at: Some(1_700_000_000),
            user: AuthUser {
                id: "user".to_string(),
                email: None,
            },
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn session_without_expiry_never_expires() {
        let session = AuthSession {
            access_token: "token".to_string(),
            expires_at: None,
            user: AuthUser {
                id: "user".to_string(),
                email: None,
            },
        };
        assert!(!session.is_expired());
    }

    #[test]
    fn static_auth_rejects_blank_credentials() {
        assert!(StaticTokenAuth::new("  ", "user", None).is_err());
        assert!(StaticTokenAuth::new("token", "", None).is_err());
    }

    #[tokio::test]
    async fn static_auth_refresh_reports_expired_token_as_invalid() {
        let auth = StaticTokenAuth::new("token", "user", Some(1)).unwrap();
        assert!(auth.current_session().is_none());
        assert!(matches!(
            auth.refresh_session().await,
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[tokio::test]
    async fn static_auth_sign_out_clears_session() {
        let auth = StaticTokenAuth::new("token", "user", None).unwrap();
        assert_eq!(auth.current_session().unwrap().user.id, "user");

        auth.sign_out().await.unwrap();

        assert!(auth.current_session().is_none());
        assert_eq!(auth.refresh_session().await, Err(AuthError::Unauthenticated));
    }
}
