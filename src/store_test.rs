use super::*;
use tempfile::TempDir;
use time::OffsetDateTime;

fn profile() -> UserProfile {
    UserProfile {
        id: "42".into(),
        identifier: "someone@example.com".into(),
        email: Some("someone@example.com".into()),
        display_name: None,
        roles: ["user".to_owned()].into_iter().collect(),
        permissions: std::collections::BTreeSet::new(),
        last_login_at: OffsetDateTime::UNIX_EPOCH,
    }
}

fn cache(store: &Arc<MemoryStore>) -> SessionCache {
    SessionCache::new(store.clone(), SessionKeys::REMOTE)
}

// =============================================================================
// MemoryStore
// =============================================================================

#[test]
fn memory_store_get_absent_is_none() {
    let store = MemoryStore::new();
    assert!(store.get("missing").unwrap().is_none());
}

#[test]
fn memory_store_set_get_remove() {
    let store = MemoryStore::new();
    store.set("k", b"v").unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    store.remove("k").unwrap();
    assert!(store.get("k").unwrap().is_none());
    assert!(store.is_empty());
}

#[test]
fn memory_store_remove_absent_succeeds() {
    assert!(MemoryStore::new().remove("nothing").is_ok());
}

// =============================================================================
// FileStore
// =============================================================================

#[test]
fn file_store_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    FileStore::new(dir.path()).set("auth_token", b"abc").unwrap();
    let reopened = FileStore::new(dir.path());
    assert_eq!(reopened.get("auth_token").unwrap().as_deref(), Some(&b"abc"[..]));
}

#[test]
fn file_store_missing_dir_reads_none() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("absent"));
    assert!(store.get("auth_token").unwrap().is_none());
    assert!(store.remove("auth_token").is_ok());
    assert!(!dir.path().join("absent").exists());
}

#[test]
fn file_store_creates_missing_dir_on_write() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("nested").join("session"));
    store.set("auth_token", b"abc").unwrap();
    assert!(dir.path().join("nested/session/auth_token").exists());
}

#[test]
fn file_store_overwrite_replaces_value() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    store.set("k", b"first").unwrap();
    store.set("k", b"second").unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"second"[..]));
}

#[test]
fn file_store_rejects_path_like_keys() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    for key in ["", "../escape", "a/b", ".hidden"] {
        assert!(matches!(store.set(key, b"x"), Err(StoreError::InvalidKey(_))), "key {key:?}");
    }
}

#[cfg(unix)]
#[test]
fn file_store_writes_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    store.set("auth_token", b"secret").unwrap();
    let mode = fs::metadata(dir.path().join("auth_token")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// =============================================================================
// SessionKeys
// =============================================================================

#[test]
fn remote_and_mock_namespaces_do_not_overlap() {
    let remote = SessionKeys::REMOTE.all();
    for key in SessionKeys::MOCK.all() {
        assert!(!remote.contains(&key));
    }
}

// =============================================================================
// SessionCache
// =============================================================================

#[test]
fn write_session_persists_all_present_fields() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache(&store);
    let session = Session {
        access_token: "a".into(),
        refresh_token: Some("r".into()),
        expires_in_seconds: Some(60),
        user: Some(profile()),
    };
    cache.write_session(&session).unwrap();
    assert_eq!(cache.token().unwrap().as_deref(), Some("a"));
    assert_eq!(cache.refresh_token().unwrap().as_deref(), Some("r"));
    assert_eq!(cache.user().unwrap(), Some(profile()));
}

#[test]
fn write_session_without_optionals_writes_token_only() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache(&store);
    let session = Session { access_token: "a".into(), refresh_token: None, expires_in_seconds: None, user: None };
    cache.write_session(&session).unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn write_tokens_keeps_refresh_token_when_none_given() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache(&store);
    cache.write_tokens("a1", Some("r1")).unwrap();
    cache.write_tokens("a2", None).unwrap();
    assert_eq!(cache.token().unwrap().as_deref(), Some("a2"));
    assert_eq!(cache.refresh_token().unwrap().as_deref(), Some("r1"));
}

#[test]
fn empty_token_reads_as_absent() {
    let store = Arc::new(MemoryStore::new());
    store.set("auth_token", b"").unwrap();
    assert!(cache(&store).token().unwrap().is_none());
}

#[test]
fn non_utf8_token_is_corrupt() {
    let store = Arc::new(MemoryStore::new());
    store.set("auth_token", &[0xff, 0xfe]).unwrap();
    assert!(matches!(cache(&store).token(), Err(StoreError::Corrupt { .. })));
}

#[test]
fn user_is_strict_about_corrupt_json() {
    let store = Arc::new(MemoryStore::new());
    store.set("auth_user", b"{not json").unwrap();
    assert!(matches!(cache(&store).user(), Err(StoreError::Corrupt { .. })));
}

#[test]
fn cached_user_evicts_corrupt_json() {
    let store = Arc::new(MemoryStore::new());
    store.set("auth_user", b"{not json").unwrap();
    assert!(cache(&store).cached_user().unwrap().is_none());
    assert!(store.get("auth_user").unwrap().is_none());
}

#[test]
fn clear_removes_all_three_keys_only() {
    let store = Arc::new(MemoryStore::new());
    store.set("unrelated", b"keep").unwrap();
    let cache = cache(&store);
    cache.write_tokens("a", Some("r")).unwrap();
    cache.write_user(&profile()).unwrap();
    cache.clear().unwrap();
    assert!(cache.token().unwrap().is_none());
    assert!(cache.refresh_token().unwrap().is_none());
    assert!(cache.user().unwrap().is_none());
    assert_eq!(store.len(), 1);
}
