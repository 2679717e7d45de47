//! Self-contained auth service for development and tests.
//!
//! DESIGN
//! ======
//! An in-memory user directory stands in for the backend. Every operation
//! waits a fixed delay first, so latency-sensitive callers can be exercised
//! deterministically (`Duration::ZERO` skips the wait).
//!
//! Tokens are `mock_jwt.<base64 json>.signature`: readable with
//! [`MockClaims::decode`] and worthless as real credentials.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::service::AuthService;
use crate::store::{SessionCache, SessionKeys, SessionStore};
use crate::types::{Credentials, Session, UserProfile};

pub const DEFAULT_MOCK_DELAY_MS: u64 = 500;
const TOKEN_TTL_SECS: u64 = 3600;
const TOKEN_PREFIX: &str = "mock_jwt.";
const TOKEN_SUFFIX: &str = ".signature";
const REFRESH_PREFIX: &str = "mock_refresh_";
const ID_LEN: usize = 9;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// =============================================================================
// TOKENS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MockTokenError {
    #[error("not a mock token")]
    Format,
    #[error("token payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token payload is not valid claims: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payload carried inside a mock access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockClaims {
    pub sub: String,
    pub username: String,
    pub roles: Vec<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

impl MockClaims {
    fn for_user(user: &UserProfile, now: OffsetDateTime) -> Self {
        Self {
            sub: user.id.clone(),
            username: user.identifier.clone(),
            roles: user.roles.iter().cloned().collect(),
            exp: now.unix_timestamp().saturating_add_unsigned(TOKEN_TTL_SECS),
        }
    }

    /// Wrap the claims as a `mock_jwt.<base64 json>.signature` token.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized.
    pub fn encode(&self) -> Result<String, MockTokenError> {
        let payload = serde_json::to_vec(self)?;
        Ok(format!("{TOKEN_PREFIX}{}{TOKEN_SUFFIX}", STANDARD.encode(payload)))
    }

    /// Read the claims back out of a mock access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token was not produced by [`Self::encode`].
    pub fn decode(token: &str) -> Result<Self, MockTokenError> {
        let payload = token
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|rest| rest.strip_suffix(TOKEN_SUFFIX))
            .ok_or(MockTokenError::Format)?;
        let bytes = STANDARD.decode(payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.exp <= now.unix_timestamp()
    }
}

fn refresh_token_for(user_id: &str, now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    format!("{REFRESH_PREFIX}{user_id}_{millis}")
}

/// User id embedded in a mock refresh token.
fn refresh_token_subject(token: &str) -> Option<&str> {
    token
        .strip_prefix(REFRESH_PREFIX)
        .and_then(|rest| rest.rsplit_once('_'))
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ID_ALPHABET.len());
            char::from(ID_ALPHABET[idx])
        })
        .collect()
}

// =============================================================================
// DIRECTORY
// =============================================================================

struct DirectoryEntry {
    secret: String,
    profile: UserProfile,
}

/// Optional profile fields for [`MockAuthService::add_user`]. Unset fields
/// get fixture defaults.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub roles: Option<BTreeSet<String>>,
    pub permissions: Option<BTreeSet<String>>,
    pub last_login_at: Option<OffsetDateTime>,
}

fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn fixture(id: &str, identifier: &str, display_name: &str, roles: &[&str], permissions: &[&str]) -> UserProfile {
    UserProfile {
        id: id.to_owned(),
        identifier: identifier.to_owned(),
        email: Some(identifier.to_owned()),
        display_name: Some(display_name.to_owned()),
        roles: set_of(roles),
        permissions: set_of(permissions),
        last_login_at: OffsetDateTime::now_utc(),
    }
}

fn seed_directory() -> HashMap<String, DirectoryEntry> {
    let admin = fixture("1", "admin@example.com", "Admin User", &["admin"], &["read:all", "write:all"]);
    let user = fixture("2", "user@example.com", "Regular User", &["user"], &["read:own"]);
    HashMap::from([
        (admin.identifier.clone(), DirectoryEntry { secret: "admin123".into(), profile: admin }),
        (user.identifier.clone(), DirectoryEntry { secret: "user123".into(), profile: user }),
    ])
}

// =============================================================================
// SERVICE
// =============================================================================

/// Simulated backend persisted under [`SessionKeys::MOCK`].
///
/// Seeded accounts: `admin@example.com / admin123` and
/// `user@example.com / user123`.
pub struct MockAuthService {
    directory: Mutex<HashMap<String, DirectoryEntry>>,
    delay: Duration,
    cache: SessionCache,
}

impl MockAuthService {
    /// Mock with the default 500 ms latency.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_delay(store, Duration::from_millis(DEFAULT_MOCK_DELAY_MS))
    }

    #[must_use]
    pub fn with_delay(store: Arc<dyn SessionStore>, delay: Duration) -> Self {
        Self {
            directory: Mutex::new(seed_directory()),
            delay,
            cache: SessionCache::new(store, SessionKeys::MOCK),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Register (or replace) a fixture account and return its profile.
    pub fn add_user(&self, identifier: &str, secret: &str, overrides: ProfileOverrides) -> UserProfile {
        let profile = UserProfile {
            id: overrides.id.unwrap_or_else(generate_id),
            identifier: identifier.to_owned(),
            email: Some(overrides.email.unwrap_or_else(|| identifier.to_owned())),
            display_name: Some(overrides.display_name.unwrap_or_else(|| identifier.to_owned())),
            roles: overrides.roles.unwrap_or_else(|| set_of(&["user"])),
            permissions: overrides.permissions.unwrap_or_default(),
            last_login_at: overrides.last_login_at.unwrap_or_else(OffsetDateTime::now_utc),
        };
        self.lock_directory()
            .insert(identifier.to_owned(), DirectoryEntry { secret: secret.to_owned(), profile: profile.clone() });
        debug!(%identifier, id = %profile.id, "mock user registered");
        profile
    }

    fn lock_directory(&self) -> MutexGuard<'_, HashMap<String, DirectoryEntry>> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_by_id(&self, id: &str) -> Option<UserProfile> {
        self.lock_directory()
            .values()
            .find(|entry| entry.profile.id == id)
            .map(|entry| entry.profile.clone())
    }

    async fn simulate_delay(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// A claims encoding failure surfaces as the mock backend's 500.
    fn issue_session(user: UserProfile, now: OffsetDateTime) -> Result<Session, AuthError> {
        let access_token = MockClaims::for_user(&user, now).encode().map_err(|e| {
            warn!(error = %e, "mock token encoding failed");
            AuthError::Transport { status: Some(500), message: "token issue failed".to_owned() }
        })?;
        Ok(Session {
            access_token,
            refresh_token: Some(refresh_token_for(&user.id, now)),
            expires_in_seconds: Some(TOKEN_TTL_SECS),
            user: Some(user),
        })
    }

    /// Profile to mint refreshed tokens for: the cached user, or the
    /// directory entry named by the refresh token when the cache is empty.
    fn refresh_subject(&self, refresh_token: &str) -> Result<UserProfile, AuthError> {
        match self.cache.user() {
            Ok(Some(user)) => Ok(user),
            Ok(None) => refresh_token_subject(refresh_token)
                .and_then(|id| self.find_by_id(id))
                .ok_or(AuthError::RefreshFailed),
            Err(e) => {
                warn!(error = %e, "cached user unreadable during refresh");
                Err(AuthError::RefreshFailed)
            }
        }
    }

    /// The directory's answer to "who owns this token", or a 401.
    fn resolve_token(&self, token: &str) -> Result<UserProfile, AuthError> {
        let unauthorized = |message: &str| AuthError::Transport { status: Some(401), message: message.to_owned() };
        let claims = MockClaims::decode(token).map_err(|e| {
            warn!(error = %e, "mock token rejected");
            unauthorized("invalid token")
        })?;
        if claims.is_expired(OffsetDateTime::now_utc()) {
            return Err(unauthorized("token expired"));
        }
        self.find_by_id(&claims.sub).ok_or_else(|| unauthorized("user not found"))
    }
}

#[async_trait::async_trait]
impl AuthService for MockAuthService {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.simulate_delay().await;

        let now = OffsetDateTime::now_utc();
        let user = {
            let mut directory = self.lock_directory();
            let entry = directory
                .get_mut(&credentials.identifier)
                .filter(|entry| entry.secret == credentials.secret)
                .ok_or(AuthError::InvalidCredentials)?;
            entry.profile.last_login_at = now;
            entry.profile.clone()
        };

        let session = Self::issue_session(user, now)?;
        if let Err(e) = self.cache.write_session(&session) {
            warn!(error = %e, "session write failed; discarding partial session");
            self.cache.clear_logged();
            return Err(e.into());
        }
        info!(identifier = %credentials.identifier, "mock login succeeded");
        Ok(session)
    }

    async fn logout(&self) {
        self.simulate_delay().await;
        self.cache.clear_logged();
        info!("mock logout");
    }

    async fn refresh_tokens(&self) -> Result<Session, AuthError> {
        self.simulate_delay().await;

        let refresh_token = match self.cache.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(AuthError::NoRefreshToken),
            Err(e) => {
                warn!(error = %e, "stored refresh token unreadable");
                self.cache.clear_logged();
                return Err(AuthError::RefreshFailed);
            }
        };

        let user = match self.refresh_subject(&refresh_token) {
            Ok(user) => user,
            Err(e) => {
                self.cache.clear_logged();
                return Err(e);
            }
        };

        let session = match Self::issue_session(user, OffsetDateTime::now_utc()) {
            Ok(session) => session,
            Err(_) => {
                self.cache.clear_logged();
                return Err(AuthError::RefreshFailed);
            }
        };
        if let Err(e) = self.cache.write_session(&session) {
            warn!(error = %e, "refreshed session write failed; session cleared");
            self.cache.clear_logged();
            return Err(AuthError::RefreshFailed);
        }
        info!("mock tokens refreshed");
        Ok(session)
    }

    async fn current_user(&self) -> Result<UserProfile, AuthError> {
        self.simulate_delay().await;

        if let Some(user) = self.cache.cached_user()? {
            return Ok(user);
        }

        let Some(token) = self.cache.token()? else {
            return Err(AuthError::NotAuthenticated);
        };

        match self.resolve_token(&token) {
            Ok(user) => {
                self.cache.write_user(&user)?;
                Ok(user)
            }
            Err(e) => {
                self.cache.clear_logged();
                Err(e)
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
#[path = "mock_test.rs"]
mod tests;
