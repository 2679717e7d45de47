//! Observable session state over an [`AuthService`].
//!
//! DESIGN
//! ======
//! One [`SessionState`] record behind a mutex, mutated only by the four
//! operations. Every mutation notifies subscribers with a snapshot taken
//! after the lock is released, and the lock is never held across an await.
//!
//! PHASES
//! ======
//! ```text
//! Unauthenticated ──login──▶ Authenticating ──ok, user──▶ Authenticated
//!                                  │
//!                                  └──ok, no user──▶ AuthenticatedLoadingUser ──▶ Authenticated
//! Authenticated ──refresh_auth──▶ Refreshing ──▶ Authenticated | Unauthenticated
//! any ──logout──▶ LoggingOut ──▶ Unauthenticated
//! ```
//! Failures that invalidate the session always land in `Unauthenticated`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::AuthError;
use crate::service::AuthService;
use crate::types::{Credentials, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    AuthenticatedLoadingUser,
    Refreshing,
    LoggingOut,
}

/// Everything a UI needs to render the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub phase: AuthPhase,
    pub authenticated: bool,
    pub loading: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
    /// Message of the most recent failure, cleared when an operation starts.
    pub error: Option<String>,
}

impl SessionState {
    /// Drop every session field, including `error`.
    pub fn reset_session(&mut self) {
        self.authenticated = false;
        self.access_token = None;
        self.refresh_token = None;
        self.user = None;
        self.error = None;
    }

    fn settled_phase(&self) -> AuthPhase {
        if self.authenticated { AuthPhase::Authenticated } else { AuthPhase::Unauthenticated }
    }
}

/// Handle returned by [`SessionAdapter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&SessionState) + Send + Sync>;

pub struct SessionAdapter {
    service: Arc<dyn AuthService>,
    state: Mutex<SessionState>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl SessionAdapter {
    /// Adapter seeded from the service's stored token. With a token present
    /// the phase starts at [`AuthPhase::AuthenticatedLoadingUser`]; call
    /// [`Self::restore`] (or use [`Self::connect`]) to load the user.
    #[must_use]
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        let token = service.token();
        let state = SessionState {
            phase: if token.is_some() { AuthPhase::AuthenticatedLoadingUser } else { AuthPhase::Unauthenticated },
            authenticated: token.is_some(),
            access_token: token,
            ..SessionState::default()
        };
        Self {
            service,
            state: Mutex::new(state),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// [`Self::new`] followed by [`Self::restore`].
    pub async fn connect(service: Arc<dyn AuthService>) -> Self {
        let adapter = Self::new(service);
        adapter.restore().await;
        adapter
    }

    /// Load the user for a session restored from storage. No-op when the
    /// user is already known or no session exists.
    pub async fn restore(&self) {
        let needs_user = {
            let state = self.lock_state();
            state.authenticated && state.user.is_none()
        };
        if needs_user {
            self.load_user_data().await;
        }
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    /// Register `callback`, invoked with a snapshot after every mutation.
    pub fn subscribe(&self, callback: impl Fn(&SessionState) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_subscribers().push((id, Arc::new(callback)));
        id
    }

    /// Returns whether `id` was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock_state().authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.lock_state().user.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.lock_state().phase
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Sign in. Returns whether the adapter is authenticated afterwards.
    pub async fn login(&self, credentials: &Credentials) -> bool {
        let _loading = self.begin(AuthPhase::Authenticating);

        match self.service.login(credentials).await {
            Ok(session) => {
                let has_user = session.user.is_some();
                self.update(|state| {
                    state.authenticated = true;
                    state.access_token = Some(session.access_token);
                    state.refresh_token = session.refresh_token;
                    state.user = session.user;
                });
                if !has_user {
                    self.fetch_user().await;
                }
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "login failed");
                self.update(|state| state.error = Some(e.to_string()));
            }
        }

        self.is_authenticated()
    }

    /// Sign out. Local state is reset whatever the service reports.
    pub async fn logout(&self) {
        let _loading = self.begin(AuthPhase::LoggingOut);
        self.service.logout().await;
        self.update(SessionState::reset_session);
    }

    /// Exchange the held refresh token for new tokens. Returns `false`
    /// without calling the service when no refresh token is held.
    pub async fn refresh_auth(&self) -> bool {
        if self.lock_state().refresh_token.is_none() {
            debug!("refresh skipped; no refresh token held");
            return false;
        }

        let _loading = self.begin(AuthPhase::Refreshing);
        match self.service.refresh_tokens().await {
            Ok(session) => {
                self.update(|state| {
                    state.authenticated = true;
                    state.access_token = Some(session.access_token);
                    if let Some(refresh_token) = session.refresh_token {
                        state.refresh_token = Some(refresh_token);
                    }
                    if let Some(user) = session.user {
                        state.user = Some(user);
                    }
                });
                true
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "refresh failed");
                self.update(|state| {
                    state.reset_session();
                    state.error = Some(e.to_string());
                });
                false
            }
        }
    }

    /// Fetch the current user. No-op when not authenticated.
    pub async fn load_user_data(&self) {
        if !self.is_authenticated() {
            return;
        }
        let _loading = self.begin(AuthPhase::AuthenticatedLoadingUser);
        self.fetch_user().await;
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn fetch_user(&self) {
        self.update(|state| state.phase = AuthPhase::AuthenticatedLoadingUser);

        match self.service.current_user().await {
            Ok(user) => self.update(|state| state.user = Some(user)),
            Err(e) => self.record_user_failure(&e),
        }
    }

    fn record_user_failure(&self, err: &AuthError) {
        let invalidated = err.invalidates_session();
        warn!(error = %err, code = err.error_code(), invalidated, "user load failed");
        self.update(|state| {
            if invalidated {
                state.reset_session();
            }
            state.error = Some(err.to_string());
        });
    }

    /// Enter `phase` with `loading` set. The returned guard settles the
    /// phase and clears `loading` when dropped.
    fn begin(&self, phase: AuthPhase) -> LoadingGuard<'_> {
        self.update(|state| {
            state.phase = phase;
            state.loading = true;
            state.error = None;
        });
        LoadingGuard { adapter: self }
    }

    fn update(&self, mutate: impl FnOnce(&mut SessionState)) {
        let snapshot = {
            let mut state = self.lock_state();
            mutate(&mut state);
            state.clone()
        };
        let subscribers: Vec<Subscriber> = self.lock_subscribers().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in subscribers {
            callback(&snapshot);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct LoadingGuard<'a> {
    adapter: &'a SessionAdapter,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.adapter.update(|state| {
            state.loading = false;
            state.phase = state.settled_phase();
        });
    }
}

#[cfg(test)]
#[path = "adapter_test.rs"]
mod tests;
