//! Error kinds surfaced by auth services.
//!
//! DESIGN
//! ======
//! One enum for every service operation. The adapter inspects
//! [`AuthError::invalidates_session`] instead of matching on message text, so
//! wording changes in backend messages never change lifecycle behavior.

use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors produced by [`crate::AuthService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identifier/secret pair did not match an account.
    #[error("invalid identifier or secret")]
    InvalidCredentials,

    /// A refresh was attempted with no refresh token stored.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The backend rejected the refresh or the cached session was corrupt.
    /// Stored session keys have already been cleared.
    #[error("failed to refresh authentication")]
    RefreshFailed,

    /// An operation that needs a session ran with none present.
    #[error("user not authenticated")]
    NotAuthenticated,

    /// Network or backend failure. `message` is the backend's text when it
    /// supplied one.
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    /// The session store could not be read or written.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// A configuration value was missing or could not be parsed.
    #[error("config parse failed: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable machine-readable code for logs and CLI output.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::NoRefreshToken => "E_NO_REFRESH_TOKEN",
            Self::RefreshFailed => "E_REFRESH_FAILED",
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::Transport { .. } => "E_TRANSPORT",
            Self::Store(_) => "E_STORE",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// Whether repeating the same call may succeed without user action.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transport { status: None | Some(429 | 500..=599), .. })
    }

    /// Whether this failure means the session is gone and callers should
    /// treat the user as signed out.
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated | Self::RefreshFailed | Self::Transport { status: Some(401), .. }
        )
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        Self::Transport { status: err.status, message: err.message }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
