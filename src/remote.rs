//! Transport-backed auth service.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Timeouts;
use crate::error::AuthError;
use crate::service::AuthService;
use crate::store::{SessionCache, SessionKeys, SessionStore};
use crate::transport::{AuthTransport, HttpTransport};
use crate::types::{Credentials, Session, UserProfile};

/// Session lifecycle over an [`AuthTransport`], persisted under
/// [`SessionKeys::REMOTE`].
pub struct RemoteAuthService<T = HttpTransport> {
    transport: T,
    cache: SessionCache,
}

impl RemoteAuthService<HttpTransport> {
    /// HTTP service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn http(base_url: &str, timeouts: Timeouts, store: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        Ok(Self::new(HttpTransport::new(base_url, timeouts)?, store))
    }
}

impl<T: AuthTransport> RemoteAuthService<T> {
    #[must_use]
    pub fn new(transport: T, store: Arc<dyn SessionStore>) -> Self {
        Self { transport, cache: SessionCache::new(store, SessionKeys::REMOTE) }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait::async_trait]
impl<T: AuthTransport> AuthService for RemoteAuthService<T> {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let session = self.transport.login(credentials).await.map_err(|e| {
            if e.is_unauthorized() { AuthError::InvalidCredentials } else { AuthError::from(e) }
        })?;

        if let Err(e) = self.cache.write_session(&session) {
            warn!(error = %e, "session write failed; discarding partial session");
            self.cache.clear_logged();
            return Err(e.into());
        }
        info!(identifier = %credentials.identifier, "login succeeded");
        Ok(session)
    }

    async fn logout(&self) {
        match self.cache.token() {
            Ok(Some(token)) => {
                if let Err(e) = self.transport.logout(&token).await {
                    warn!(error = %e, "logout notification failed; clearing local session anyway");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "stored token unreadable during logout"),
        }
        self.cache.clear_logged();
        info!("logged out");
    }

    async fn refresh_tokens(&self) -> Result<Session, AuthError> {
        let refresh_token = match self.cache.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(AuthError::NoRefreshToken),
            Err(e) => {
                warn!(error = %e, "stored refresh token unreadable");
                self.cache.clear_logged();
                return Err(AuthError::RefreshFailed);
            }
        };

        let session = match self.transport.refresh(&refresh_token).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, status = ?e.status, "token refresh rejected; session cleared");
                self.cache.clear_logged();
                return Err(AuthError::RefreshFailed);
            }
        };

        if let Err(e) = self.cache.write_session(&session) {
            warn!(error = %e, "refreshed session write failed; session cleared");
            self.cache.clear_logged();
            return Err(AuthError::RefreshFailed);
        }
        info!("tokens refreshed");
        Ok(session)
    }

    async fn current_user(&self) -> Result<UserProfile, AuthError> {
        if let Some(user) = self.cache.cached_user()? {
            return Ok(user);
        }

        let Some(token) = self.cache.token()? else {
            return Err(AuthError::NotAuthenticated);
        };

        match self.transport.me(&token).await {
            Ok(user) => {
                self.cache.write_user(&user)?;
                Ok(user)
            }
            Err(e) => {
                if e.is_unauthorized() {
                    warn!("backend rejected access token; session cleared");
                    self.cache.clear_logged();
                }
                Err(e.into())
            }
        }
    }

    fn invalidate_cached_user(&self) -> Result<(), AuthError> {
        Ok(self.cache.remove_user()?)
    }

    fn token(&self) -> Option<String> {
        self.cache.token().unwrap_or_else(|e| {
            warn!(error = %e, "stored access token unreadable");
            None
        })
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
