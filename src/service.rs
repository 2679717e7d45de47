//! The auth service contract both implementations conform to.
//!
//! LIFECYCLE
//! =========
//! - login:        persist token, refresh token, user before returning
//! - logout:       best-effort backend notice, then unconditional clear
//! - refresh:      `NoRefreshToken` leaves storage alone; any other failure
//!                 clears every key
//! - current_user: cache-first; a 401 from the backend clears storage
//!
//! Implementations are chosen by injection (`Arc<dyn AuthService>`), never
//! by inspecting the concrete type.

use crate::error::AuthError;
use crate::types::{Credentials, Session, UserProfile};

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Validate credentials and persist the resulting session.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] on mismatch, [`AuthError::Transport`]
    /// when the backend is unreachable or fails. Nothing is written on error.
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// End the session. Never fails; local state is always cleared.
    async fn logout(&self);

    /// Obtain new tokens with the stored refresh token.
    ///
    /// # Errors
    ///
    /// [`AuthError::NoRefreshToken`] when none is stored (no mutation),
    /// [`AuthError::RefreshFailed`] otherwise (storage cleared).
    async fn refresh_tokens(&self) -> Result<Session, AuthError>;

    /// The signed-in user, from cache when available.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotAuthenticated`] with no token stored; transport
    /// failures otherwise. A 401 clears storage first.
    async fn current_user(&self) -> Result<UserProfile, AuthError>;

    /// Drop the cached profile so the next [`Self::current_user`] asks the
    /// backend again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn invalidate_cached_user(&self) -> Result<(), AuthError>;

    /// Presence check of the access token. No expiry or signature checks.
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// The stored access token, if any.
    fn token(&self) -> Option<String>;
}
