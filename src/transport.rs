//! Credential transport: the HTTP channel to the auth backend.
//!
//! `AuthTransport` is the seam the remote service talks through; tests
//! script it directly. `HttpTransport` is the `reqwest` implementation of:
//!
//! - `POST {base}/auth/login`   `{identifier, secret, rememberMe?}` -> session
//! - `POST {base}/auth/logout`  bearer, empty body, response ignored
//! - `POST {base}/auth/refresh` `{refreshToken}` -> `{token, refreshToken?}`
//! - `GET  {base}/auth/me`      bearer -> profile
//!
//! Non-2xx bodies may carry `{message}`, which is surfaced verbatim.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::Timeouts;
use crate::error::AuthError;
use crate::types::{Credentials, Session, UserProfile};

const LOGIN_FAILED: &str = "Login failed";
const LOGOUT_FAILED: &str = "Logout failed";
const REFRESH_FAILED: &str = "Failed to refresh authentication";
const ME_FAILED: &str = "Failed to get current user";

// =============================================================================
// ERROR
// =============================================================================

/// A failed backend exchange. `status` is `None` when no response arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }
}

// =============================================================================
// TRANSPORT TRAIT
// =============================================================================

/// Backend calls needed by the session lifecycle. Enables mocking in tests.
#[async_trait::async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange credentials for a session.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or non-2xx status.
    async fn login(&self, credentials: &Credentials) -> Result<Session, TransportError>;

    /// Tell the backend the access token is no longer in use.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or non-2xx status.
    async fn logout(&self, access_token: &str) -> Result<(), TransportError>;

    /// Exchange a refresh token for new tokens.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or non-2xx status.
    async fn refresh(&self, refresh_token: &str) -> Result<Session, TransportError>;

    /// Fetch the profile the access token belongs to.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on network failure or non-2xx status.
    async fn me(&self, access_token: &str) -> Result<UserProfile, TransportError>;
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport rooted at `base_url` (trailing `/` ignored).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeouts: Timeouts) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::Config(format!("http client build failed: {e}")))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, fallback: &str) -> Result<String, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::unreachable(e.to_string()))?;

        if !(200..300).contains(&status) {
            let message = error_message(&text).unwrap_or_else(|| fallback.to_owned());
            return Err(TransportError::status(status, message));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl AuthTransport for HttpTransport {
    async fn login(&self, credentials: &Credentials) -> Result<Session, TransportError> {
        let request = self.http.post(self.url("/auth/login")).json(credentials);
        let text = self.send(request, LOGIN_FAILED).await?;
        parse_body(&text, LOGIN_FAILED)
    }

    async fn logout(&self, access_token: &str) -> Result<(), TransportError> {
        let request = self
            .http
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({}));
        self.send(request, LOGOUT_FAILED).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, TransportError> {
        let request = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token });
        let text = self.send(request, REFRESH_FAILED).await?;
        parse_body(&text, REFRESH_FAILED)
    }

    async fn me(&self, access_token: &str) -> Result<UserProfile, TransportError> {
        let request = self.http.get(self.url("/auth/me")).bearer_auth(access_token);
        let text = self.send(request, ME_FAILED).await?;
        parse_body(&text, ME_FAILED)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

// =============================================================================
// PARSING
// =============================================================================

/// Extract `{message}` from an error body, if present and non-empty.
fn error_message(body: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { message: Some(message) }) if !message.trim().is_empty() => Some(message),
        _ => None,
    }
}

/// Decode a 2xx body. A body that does not match is reported with the
/// operation's fallback text; it has no HTTP status of its own.
fn parse_body<T: DeserializeOwned>(text: &str, fallback: &str) -> Result<T, TransportError> {
    serde_json::from_str(text).map_err(|e| {
        tracing::warn!(error = %e, "unexpected auth backend response body");
        TransportError::unreachable(format!("{fallback}: unexpected response"))
    })
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
