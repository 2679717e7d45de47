use super::*;
use crate::mock::MockAuthService;
use crate::store::{MemoryStore, SessionStore};
use crate::types::Session;
use std::time::Duration;
use time::OffsetDateTime;

// =========================================================================
// StubService
// =========================================================================

/// Service whose answers are set per test. Unset answers fail with a 503.
#[derive(Default)]
struct StubService {
    token: Mutex<Option<String>>,
    login: Mutex<Option<Result<Session, AuthError>>>,
    refresh: Mutex<Option<Result<Session, AuthError>>>,
    me: Mutex<Vec<Result<UserProfile, AuthError>>>,
    logouts: AtomicU64,
}

fn unavailable() -> AuthError {
    AuthError::Transport { status: Some(503), message: "service unavailable".into() }
}

#[async_trait::async_trait]
impl AuthService for StubService {
    async fn login(&self, _credentials: &Credentials) -> Result<Session, AuthError> {
        let result = self.login.lock().unwrap().take().unwrap_or_else(|| Err(unavailable()));
        if let Ok(session) = &result {
            *self.token.lock().unwrap() = Some(session.access_token.clone());
        }
        result
    }

    async fn logout(&self) {
        self.logouts.fetch_add(1, Ordering::Relaxed);
        *self.token.lock().unwrap() = None;
    }

    async fn refresh_tokens(&self) -> Result<Session, AuthError> {
        self.refresh.lock().unwrap().take().unwrap_or_else(|| Err(unavailable()))
    }

    async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let mut queue = self.me.lock().unwrap();
        if queue.is_empty() { Err(unavailable()) } else { queue.remove(0) }
    }

    fn invalidate_cached_user(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

fn profile(id: &str) -> UserProfile {
    UserProfile {
        id: id.into(),
        identifier: format!("user{id}@example.com"),
        email: None,
        display_name: None,
        roles: std::collections::BTreeSet::new(),
        permissions: std::collections::BTreeSet::new(),
        last_login_at: OffsetDateTime::UNIX_EPOCH,
    }
}

fn session(token: &str, refresh: Option<&str>, user: Option<UserProfile>) -> Session {
    Session { access_token: token.into(), refresh_token: refresh.map(str::to_owned), expires_in_seconds: None, user }
}

fn mock_adapter() -> SessionAdapter {
    SessionAdapter::new(Arc::new(MockAuthService::with_delay(Arc::new(MemoryStore::new()), Duration::ZERO)))
}

fn admin() -> Credentials {
    Credentials::new("admin@example.com", "admin123")
}

fn record_phases(adapter: &SessionAdapter) -> Arc<Mutex<Vec<AuthPhase>>> {
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    adapter.subscribe(move |state| sink.lock().unwrap().push(state.phase));
    phases
}

// =========================================================================
// Construction
// =========================================================================

#[test]
fn fresh_adapter_is_unauthenticated() {
    let adapter = mock_adapter();
    let state = adapter.snapshot();
    assert_eq!(state, SessionState::default());
    assert_eq!(adapter.phase(), AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn stored_token_restores_through_user_load() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let service = Arc::new(MockAuthService::with_delay(store.clone(), Duration::ZERO));
    service.login(&admin()).await.unwrap();
    service.invalidate_cached_user().unwrap();

    let adapter = SessionAdapter::new(service);
    assert_eq!(adapter.phase(), AuthPhase::AuthenticatedLoadingUser);
    assert!(adapter.is_authenticated());
    assert!(adapter.user().is_none());

    adapter.restore().await;
    assert_eq!(adapter.phase(), AuthPhase::Authenticated);
    assert_eq!(adapter.user().unwrap().id, "1");
    assert!(!adapter.is_loading());
}

#[tokio::test]
async fn connect_loads_user_immediately() {
    let stub = StubService::default();
    *stub.token.lock().unwrap() = Some("tok".into());
    stub.me.lock().unwrap().push(Ok(profile("5")));

    let adapter = SessionAdapter::connect(Arc::new(stub)).await;
    assert_eq!(adapter.user().unwrap().id, "5");
    assert_eq!(adapter.phase(), AuthPhase::Authenticated);
}

#[tokio::test]
async fn connect_without_token_does_nothing() {
    let adapter = SessionAdapter::connect(Arc::new(StubService::default())).await;
    assert_eq!(adapter.snapshot(), SessionState::default());
}

// =========================================================================
// login
// =========================================================================

#[tokio::test]
async fn login_populates_state() {
    let adapter = mock_adapter();
    assert!(adapter.login(&admin()).await);

    let state = adapter.snapshot();
    assert!(state.authenticated);
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert!(state.access_token.is_some());
    assert!(state.refresh_token.is_some());
    assert!(state.user.unwrap().has_role("admin"));
    assert_eq!(state.phase, AuthPhase::Authenticated);
}

#[tokio::test]
async fn login_with_bad_credentials_sets_error() {
    let adapter = mock_adapter();
    assert!(!adapter.login(&Credentials::new("nobody@example.com", "x")).await);

    assert!(!adapter.is_authenticated());
    assert!(!adapter.is_loading());
    assert!(!adapter.error().unwrap().is_empty());
    assert_eq!(adapter.phase(), AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn login_passes_through_authenticating() {
    let adapter = mock_adapter();
    let phases = record_phases(&adapter);
    adapter.login(&admin()).await;

    let phases = phases.lock().unwrap().clone();
    assert_eq!(phases.first(), Some(&AuthPhase::Authenticating));
    assert_eq!(phases.last(), Some(&AuthPhase::Authenticated));
}

#[tokio::test]
async fn login_without_user_loads_it() {
    let stub = StubService::default();
    *stub.login.lock().unwrap() = Some(Ok(session("tok", Some("ref"), None)));
    stub.me.lock().unwrap().push(Ok(profile("8")));
    let adapter = SessionAdapter::new(Arc::new(stub));
    let phases = record_phases(&adapter);

    assert!(adapter.login(&admin()).await);
    assert_eq!(adapter.user().unwrap().id, "8");
    assert!(phases.lock().unwrap().contains(&AuthPhase::AuthenticatedLoadingUser));
}

#[tokio::test]
async fn login_whose_user_load_is_rejected_ends_signed_out() {
    let stub = StubService::default();
    *stub.login.lock().unwrap() = Some(Ok(session("tok", None, None)));
    stub.me.lock().unwrap().push(Err(AuthError::NotAuthenticated));
    let adapter = SessionAdapter::new(Arc::new(stub));

    assert!(!adapter.login(&admin()).await);
    let state = adapter.snapshot();
    assert!(!state.authenticated);
    assert!(state.access_token.is_none());
    assert_eq!(state.error.as_deref(), Some("user not authenticated"));
}

#[tokio::test]
async fn loading_is_visible_to_subscribers_during_operation() {
    let adapter = mock_adapter();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    adapter.subscribe(move |state| sink.lock().unwrap().push(state.loading));

    adapter.login(&admin()).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&true));
    assert_eq!(seen.last(), Some(&false));
}

// =========================================================================
// logout
// =========================================================================

#[tokio::test]
async fn logout_resets_everything() {
    let adapter = mock_adapter();
    adapter.login(&admin()).await;
    adapter.logout().await;

    let state = adapter.snapshot();
    assert_eq!(state, SessionState::default());
}

#[tokio::test]
async fn logout_when_signed_out_still_calls_service() {
    let stub = Arc::new(StubService::default());
    let adapter = SessionAdapter::new(stub.clone());
    adapter.logout().await;
    assert_eq!(stub.logouts.load(Ordering::Relaxed), 1);
    assert!(!adapter.is_authenticated());
}

// =========================================================================
// refresh_auth
// =========================================================================

#[tokio::test]
async fn refresh_without_refresh_token_is_noop() {
    let stub = Arc::new(StubService::default());
    *stub.refresh.lock().unwrap() = Some(Ok(session("tok2", None, None)));
    let adapter = SessionAdapter::new(stub.clone());

    assert!(!adapter.refresh_auth().await);
    assert!(stub.refresh.lock().unwrap().is_some());
    assert_eq!(adapter.snapshot(), SessionState::default());
}

#[tokio::test]
async fn refresh_replaces_tokens() {
    let stub = StubService::default();
    *stub.login.lock().unwrap() = Some(Ok(session("tok1", Some("ref1"), Some(profile("1")))));
    *stub.refresh.lock().unwrap() = Some(Ok(session("tok2", None, None)));
    let adapter = SessionAdapter::new(Arc::new(stub));
    adapter.login(&admin()).await;

    assert!(adapter.refresh_auth().await);
    let state = adapter.snapshot();
    assert_eq!(state.access_token.as_deref(), Some("tok2"));
    assert_eq!(state.refresh_token.as_deref(), Some("ref1"));
    assert_eq!(state.user.unwrap().id, "1");
    assert_eq!(state.phase, AuthPhase::Authenticated);
}

#[tokio::test]
async fn refresh_failure_resets_and_reports() {
    let stub = StubService::default();
    *stub.login.lock().unwrap() = Some(Ok(session("tok1", Some("ref1"), Some(profile("1")))));
    *stub.refresh.lock().unwrap() = Some(Err(AuthError::RefreshFailed));
    let adapter = SessionAdapter::new(Arc::new(stub));
    adapter.login(&admin()).await;

    assert!(!adapter.refresh_auth().await);
    let state = adapter.snapshot();
    assert!(!state.authenticated);
    assert!(state.refresh_token.is_none());
    assert!(state.user.is_none());
    assert_eq!(state.error.as_deref(), Some("failed to refresh authentication"));
    assert_eq!(state.phase, AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn refresh_against_mock_keeps_user() {
    let adapter = mock_adapter();
    adapter.login(&admin()).await;
    assert!(adapter.refresh_auth().await);
    assert_eq!(adapter.user().unwrap().id, "1");
}

// =========================================================================
// load_user_data
// =========================================================================

#[tokio::test]
async fn load_user_data_when_signed_out_is_noop() {
    let stub = Arc::new(StubService::default());
    stub.me.lock().unwrap().push(Ok(profile("1")));
    let adapter = SessionAdapter::new(stub.clone());

    adapter.load_user_data().await;
    assert!(adapter.user().is_none());
    assert_eq!(stub.me.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transient_user_failure_keeps_session() {
    let stub = StubService::default();
    *stub.token.lock().unwrap() = Some("tok".into());
    let adapter = SessionAdapter::new(Arc::new(stub));

    adapter.load_user_data().await;
    let state = adapter.snapshot();
    assert!(state.authenticated);
    assert_eq!(state.access_token.as_deref(), Some("tok"));
    assert_eq!(state.error.as_deref(), Some("service unavailable"));
    assert_eq!(state.phase, AuthPhase::Authenticated);
}

#[tokio::test]
async fn unauthorized_user_failure_resets_session() {
    let stub = StubService::default();
    *stub.token.lock().unwrap() = Some("tok".into());
    stub.me.lock().unwrap().push(Err(AuthError::Transport { status: Some(401), message: "token revoked".into() }));
    let adapter = SessionAdapter::new(Arc::new(stub));

    adapter.load_user_data().await;
    let state = adapter.snapshot();
    assert!(!state.authenticated);
    assert!(state.access_token.is_none());
    assert_eq!(state.error.as_deref(), Some("token revoked"));
    assert_eq!(state.phase, AuthPhase::Unauthenticated);
}

// =========================================================================
// Subscribers
// =========================================================================

#[tokio::test]
async fn unsubscribed_callback_stops_receiving() {
    let adapter = mock_adapter();
    let count = Arc::new(AtomicU64::new(0));
    let sink = count.clone();
    let id = adapter.subscribe(move |_| {
        sink.fetch_add(1, Ordering::Relaxed);
    });

    adapter.login(&admin()).await;
    let after_login = count.load(Ordering::Relaxed);
    assert!(after_login > 0);

    assert!(adapter.unsubscribe(id));
    assert!(!adapter.unsubscribe(id));
    adapter.logout().await;
    assert_eq!(count.load(Ordering::Relaxed), after_login);
}

#[tokio::test]
async fn subscriber_may_read_adapter_state() {
    let adapter = Arc::new(mock_adapter());
    let observed = Arc::new(Mutex::new(None));
    let (sink, reader) = (observed.clone(), Arc::downgrade(&adapter));
    adapter.subscribe(move |_| {
        if let Some(adapter) = reader.upgrade() {
            *sink.lock().unwrap() = Some(adapter.is_authenticated());
        }
    });

    adapter.login(&admin()).await;
    assert_eq!(*observed.lock().unwrap(), Some(true));
}
