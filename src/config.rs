//! Environment configuration and service selection.
//!
//! ENVIRONMENT
//! ===========
//! - `AUTH_BACKEND`              `http` (default) or `mock`
//! - `AUTH_BASE_URL`             required for `http`
//! - `AUTH_MOCK_DELAY_MS`        mock latency, default 500
//! - `AUTH_REQUEST_TIMEOUT_SECS` default 30
//! - `AUTH_CONNECT_TIMEOUT_SECS` default 10
//! - `AUTH_STORE_DIR`            file-backed store; in-memory when unset

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::AuthError;
use crate::mock::{DEFAULT_MOCK_DELAY_MS, MockAuthService};
use crate::remote::RemoteAuthService;
use crate::service::AuthService;
use crate::store::{FileStore, MemoryStore, SessionStore};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Http,
    Mock,
}

/// HTTP client timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub backend: BackendKind,
    pub base_url: Option<String>,
    pub mock_delay: Duration,
    pub timeouts: Timeouts,
    pub store_dir: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            base_url: None,
            mock_delay: Duration::from_millis(DEFAULT_MOCK_DELAY_MS),
            timeouts: Timeouts::default(),
            store_dir: None,
        }
    }
}

impl AuthConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] for an unknown backend or a malformed
    /// number.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let backend = match lookup("AUTH_BACKEND") {
            Some(raw) => parse_backend(&raw)?,
            None => BackendKind::default(),
        };
        let base_url = lookup("AUTH_BASE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty());
        let mock_delay = Duration::from_millis(env_parse_u64(&lookup, "AUTH_MOCK_DELAY_MS", DEFAULT_MOCK_DELAY_MS)?);
        let timeouts = Timeouts {
            request_secs: env_parse_u64(&lookup, "AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_u64(&lookup, "AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let store_dir = lookup("AUTH_STORE_DIR").filter(|dir| !dir.trim().is_empty()).map(PathBuf::from);

        Ok(Self { backend, base_url, mock_delay, timeouts, store_dir })
    }
}

/// Parse a backend name, case-insensitively.
///
/// # Errors
///
/// Returns [`AuthError::Config`] for anything other than `http` or `mock`.
pub fn parse_backend(raw: &str) -> Result<BackendKind, AuthError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "http" | "remote" => Ok(BackendKind::Http),
        "mock" => Ok(BackendKind::Mock),
        other => Err(AuthError::Config(format!("unknown AUTH_BACKEND: {other}"))),
    }
}

fn env_parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, AuthError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| AuthError::Config(format!("{key} must be an integer: {raw}"))),
    }
}

/// Session store named by the config: file-backed under `store_dir`, else
/// in memory.
#[must_use]
pub fn build_store(config: &AuthConfig) -> Arc<dyn SessionStore> {
    match &config.store_dir {
        Some(dir) => Arc::new(FileStore::new(dir.clone())),
        None => Arc::new(MemoryStore::new()),
    }
}

/// The service implementation the config selects, over `store`.
///
/// # Errors
///
/// Returns [`AuthError::Config`] when `http` is selected without a base URL
/// or the HTTP client cannot be built.
pub fn build_service(config: &AuthConfig, store: Arc<dyn SessionStore>) -> Result<Arc<dyn AuthService>, AuthError> {
    match config.backend {
        BackendKind::Mock => {
            info!(delay_ms = config.mock_delay.as_millis(), "using mock auth service");
            Ok(Arc::new(MockAuthService::with_delay(store, config.mock_delay)))
        }
        BackendKind::Http => {
            let base_url = config
                .base_url
                .as_deref()
                .ok_or_else(|| AuthError::Config("AUTH_BASE_URL is required for the http backend".into()))?;
            info!(%base_url, "using remote auth service");
            Ok(Arc::new(RemoteAuthService::http(base_url, config.timeouts, store)?))
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
