//! Session persistence: the byte-oriented key-value store and the typed
//! cache the services read and write through it.
//!
//! DESIGN
//! ======
//! `SessionStore` is the external collaborator (browser storage, keychain,
//! files). It is synchronous because `is_authenticated` and `token` are
//! synchronous accessors. Each key is written independently; there is no
//! cross-key transaction, so readers must tolerate a token without a cached
//! user and the reverse.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{Session, UserProfile};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
    #[error("store io failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Key-value byte store that outlives the process.
pub trait SessionStore: Send + Sync {
    /// Read a value. Absent keys are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store. Used by tests and the CLI demo.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// One file per key under a directory. Files are written owner-only (0600)
/// on unix and replaced via rename so a single key is never half-written.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(key))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io { key: key.to_owned(), source }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(key, e))?;

        let tmp = self.dir.join(format!(".{key}.tmp"));
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(|e| io_error(key, e))?;
        file.write_all(value).map_err(|e| io_error(key, e))?;
        file.sync_all().map_err(|e| io_error(key, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| io_error(key, e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

// =============================================================================
// SESSION KEYS
// =============================================================================

/// The three keys a service persists under. Each implementation gets its own
/// namespace so swapping implementations at runtime never mixes sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    pub token: &'static str,
    pub refresh_token: &'static str,
    pub user: &'static str,
}

impl SessionKeys {
    /// Keys used by the HTTP-backed service.
    pub const REMOTE: Self =
        Self { token: "auth_token", refresh_token: "auth_refresh_token", user: "auth_user" };

    /// Keys used by the simulated service.
    pub const MOCK: Self =
        Self { token: "mock_auth_token", refresh_token: "mock_auth_refresh_token", user: "mock_auth_user" };

    fn all(self) -> [&'static str; 3] {
        [self.token, self.refresh_token, self.user]
    }
}

// =============================================================================
// SESSION CACHE
// =============================================================================

/// Typed view over a [`SessionStore`] for one key namespace.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    keys: SessionKeys,
}

impl SessionCache {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, keys: SessionKeys) -> Self {
        Self { store, keys }
    }

    #[must_use]
    pub fn keys(&self) -> SessionKeys {
        self.keys
    }

    /// Stored access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value is not UTF-8.
    pub fn token(&self) -> Result<Option<String>, StoreError> {
        self.read_string(self.keys.token)
    }

    /// Stored refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value is not UTF-8.
    pub fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.read_string(self.keys.refresh_token)
    }

    /// Cached profile, strictly decoded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the cached JSON does not decode.
    pub fn user(&self) -> Result<Option<UserProfile>, StoreError> {
        let Some(bytes) = self.store.get(self.keys.user)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt { key: self.keys.user.to_owned(), reason: e.to_string() })
    }

    /// Cached profile for read-through lookups. A corrupt entry is evicted
    /// and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the store itself fails.
    pub fn cached_user(&self) -> Result<Option<UserProfile>, StoreError> {
        match self.user() {
            Err(StoreError::Corrupt { key, reason }) => {
                tracing::warn!(%key, %reason, "evicting corrupt cached user");
                self.store.remove(self.keys.user)?;
                Ok(None)
            }
            other => other,
        }
    }

    /// Persist everything a login response carries.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub fn write_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write_tokens(&session.access_token, session.refresh_token.as_deref())?;
        if let Some(user) = &session.user {
            self.write_user(user)?;
        }
        Ok(())
    }

    /// Overwrite the access token and, when given, the refresh token.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub fn write_tokens(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), StoreError> {
        self.store.set(self.keys.token, access_token.as_bytes())?;
        if let Some(refresh_token) = refresh_token {
            self.store.set(self.keys.refresh_token, refresh_token.as_bytes())?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the profile cannot be encoded or stored.
    pub fn write_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(user)
            .map_err(|e| StoreError::Corrupt { key: self.keys.user.to_owned(), reason: e.to_string() })?;
        self.store.set(self.keys.user, &bytes)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn remove_user(&self) -> Result<(), StoreError> {
        self.store.remove(self.keys.user)
    }

    /// Remove all three keys. Every removal is attempted; the first failure
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for key in self.keys.all() {
            if let Err(e) = self.store.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// [`Self::clear`] for paths that must not fail; errors are logged.
    pub fn clear_logged(&self) {
        if let Err(e) = self.clear() {
            tracing::error!(error = %e, "failed to clear stored session");
        }
    }

    fn read_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        // Empty values count as absent.
        String::from_utf8(bytes)
            .map(|value| Some(value).filter(|v| !v.is_empty()))
            .map_err(|e| StoreError::Corrupt { key: key.to_owned(), reason: e.to_string() })
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
