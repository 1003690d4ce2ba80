//! Authenticated session persistence
//!
//! The session blob is the single source of truth for "is the user logged
//! in". Expiry is enforced lazily: there is no timer, a read that finds
//! `expires_at` in the past tears the session down and reports the
//! zero-value session instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{Clock, Result, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{AuthEvent, EventBus};
use crate::keys::{SESSION_KEY, is_auth_owned};
use crate::storage::KeyValueStore;

/// Provider user profile as returned by the backend.
///
/// Only `id` is required. Fields this crate does not name are kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Tokens from a successful code exchange.
///
/// `expires_in` is a delta in seconds; `SessionStore::write` converts it to
/// an absolute millisecond timestamp.
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_in: u64,
    pub user: Profile,
}

/// Point-in-time view of the session.
///
/// `Session::default()` is the unauthenticated zero value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub is_authenticated: bool,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    /// Unix milliseconds
    pub expires_at: u64,
    pub user: Option<Profile>,
}

impl Session {
    /// The access token, only while authenticated.
    pub fn bearer(&self) -> Option<&str> {
        if !self.is_authenticated {
            return None;
        }
        self.access_token.as_ref().map(|t| t.expose().as_str())
    }
}

/// Persisted form. Field names are part of the storage contract.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    access_token: Secret<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<Secret<String>>,
    expires_at: u64,
    #[serde(default)]
    user: Option<Profile>,
}

impl StoredSession {
    fn into_session(self) -> Session {
        let is_authenticated = self.user.is_some() && !self.access_token.is_blank();
        Session {
            is_authenticated,
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            user: self.user,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    initialized: Arc<AtomicBool>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One-time setup. The first call discards an already-expired session;
    /// later calls do nothing. Returns true on the call that did the work.
    pub fn init(&self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return false;
        }
        let session = self.read();
        debug!(authenticated = session.is_authenticated, "session store initialized");
        true
    }

    /// Current session.
    ///
    /// Returns the zero value when nothing is stored, the stored value does
    /// not parse, or it has expired. Expiry also clears every auth-owned key.
    pub fn read(&self) -> Session {
        let Some(stored) = self.load_stored() else {
            return Session::default();
        };

        let now = self.clock.now_millis();
        if stored.expires_at <= now {
            info!(expired_at = stored.expires_at, now, "session expired, clearing");
            self.clear();
            return Session::default();
        }

        stored.into_session()
    }

    /// Authenticated and not yet expired.
    pub fn is_valid(&self) -> bool {
        let session = self.read();
        session.is_authenticated && session.expires_at > self.clock.now_millis()
    }

    /// Persist a new session from a code exchange in one write.
    pub fn write(&self, tokens: TokenData) -> Result<Session> {
        let stored = StoredSession {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: self.expires_at(tokens.expires_in),
            user: Some(tokens.user),
        };
        self.persist(&stored)?;
        info!(expires_at = stored.expires_at, "session written");
        Ok(stored.into_session())
    }

    /// Replace tokens after a refresh. The refresh token and profile are kept
    /// unless new ones are supplied.
    pub fn update_tokens(
        &self,
        access_token: Secret<String>,
        refresh_token: Option<Secret<String>>,
        expires_in: u64,
        user: Option<Profile>,
    ) -> Result<Session> {
        let current = self
            .load_stored()
            .ok_or_else(|| common::Error::Storage("no session to update".into()))?;

        let stored = StoredSession {
            access_token,
            refresh_token: refresh_token.or(current.refresh_token),
            expires_at: self.expires_at(expires_in),
            user: user.or(current.user),
        };
        self.persist(&stored)?;
        debug!(expires_at = stored.expires_at, "session tokens updated");
        Ok(stored.into_session())
    }

    /// Drop only the session blob, leaving credentials in place.
    pub fn remove_session(&self) {
        match self.store.remove(SESSION_KEY) {
            Ok(()) => self.events.emit(AuthEvent::SessionChanged),
            Err(e) => warn!(error = %e, "failed to remove session"),
        }
    }

    /// Remove the session and every auth-owned key in the namespace.
    ///
    /// Scans all keys rather than a fixed list so values left by older
    /// releases go too.
    pub fn clear(&self) {
        let mut doomed: Vec<String> = match self.store.keys() {
            Ok(keys) => keys.into_iter().filter(|k| is_auth_owned(k)).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list keys, clearing session key only");
                Vec::new()
            }
        };
        if !doomed.iter().any(|k| k == SESSION_KEY) {
            doomed.push(SESSION_KEY.to_owned());
        }

        if let Err(e) = self.store.remove_many(&doomed) {
            warn!(error = %e, "failed to clear auth keys");
        }
        debug!(removed = doomed.len(), "cleared auth keys");
        self.events.emit(AuthEvent::SessionChanged);
        self.events.emit(AuthEvent::CredentialsChanged);
    }

    fn load_stored(&self) -> Option<StoredSession> {
        let raw = match self.store.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "ignoring malformed session");
                None
            }
        }
    }

    fn persist(&self, stored: &StoredSession) -> Result<()> {
        let json = serde_json::to_string(stored)?;
        self.store.set(SESSION_KEY, &json)?;
        self.events.emit(AuthEvent::SessionChanged);
        Ok(())
    }

    fn expires_at(&self, expires_in_secs: u64) -> u64 {
        self.clock
            .now_millis()
            .saturating_add(expires_in_secs.saturating_mul(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CREDENTIALS_KEY;
    use crate::storage::MemoryStore;
    use common::ManualClock;

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionStore) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let store = SessionStore::new(kv.clone(), clock.clone(), EventBus::new());
        (kv, clock, store)
    }

    fn profile() -> Profile {
        Profile {
            id: "user-1".into(),
            display_name: Some("Listener".into()),
            email: None,
            extra: serde_json::Map::new(),
        }
    }

    fn tokens(expires_in: u64) -> TokenData {
        TokenData {
            access_token: "at_1".into(),
            refresh_token: Some("rt_1".into()),
            expires_in,
            user: profile(),
        }
    }

    #[test]
    fn empty_store_reads_zero_session() {
        let (_, _, store) = setup();
        assert_eq!(store.read(), Session::default());
        assert!(!store.is_valid());
    }

    #[test]
    fn write_then_read_is_authenticated() {
        let (_, _, store) = setup();
        store.write(tokens(3600)).unwrap();

        let session = store.read();
        assert!(session.is_authenticated);
        assert_eq!(session.bearer(), Some("at_1"));
        assert_eq!(session.expires_at, T0 + 3_600_000);
        assert_eq!(session.user.unwrap().id, "user-1");
        assert!(store.is_valid());
    }

    #[test]
    fn expiry_is_lazy_and_clears_storage() {
        let (kv, clock, store) = setup();
        kv.set(
            SESSION_KEY,
            &serde_json::json!({
                "accessToken": "t1",
                "expiresAt": T0 + 1000,
                "user": {"id": "user-1"}
            })
            .to_string(),
        )
        .unwrap();

        assert!(store.read().is_authenticated);

        clock.advance(1001);
        assert!(!store.read().is_authenticated);
        assert!(kv.get(SESSION_KEY).unwrap().is_none());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (_, clock, store) = setup();
        store.write(tokens(1)).unwrap();

        clock.advance(999);
        assert!(store.read().is_authenticated);
        clock.advance(1);
        assert!(!store.read().is_authenticated);
    }

    #[test]
    fn missing_user_is_not_authenticated() {
        let (kv, _, store) = setup();
        kv.set(
            SESSION_KEY,
            &serde_json::json!({"accessToken": "t1", "expiresAt": T0 + 60_000}).to_string(),
        )
        .unwrap();

        let session = store.read();
        assert!(!session.is_authenticated);
        assert!(session.bearer().is_none());
    }

    #[test]
    fn malformed_session_reads_zero() {
        let (kv, _, store) = setup();
        kv.set(SESSION_KEY, "{\"accessToken\":").unwrap();
        assert_eq!(store.read(), Session::default());
    }

    #[test]
    fn clear_sweeps_auth_owned_keys() {
        let (kv, _, store) = setup();
        store.write(tokens(3600)).unwrap();
        kv.set(CREDENTIALS_KEY, "{}").unwrap();
        kv.set("spotify_refresh_token", "old").unwrap();
        kv.set("auth.demo_mode", "true").unwrap();
        kv.set("theme", "dark").unwrap();

        store.clear();

        let mut keys = kv.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["auth.demo_mode", "theme"]);
    }

    #[test]
    fn update_tokens_keeps_user_and_refresh_token() {
        let (_, clock, store) = setup();
        store.write(tokens(60)).unwrap();
        clock.advance(30_000);

        let updated = store
            .update_tokens("at_2".into(), None, 3600, None)
            .unwrap();

        assert_eq!(updated.bearer(), Some("at_2"));
        assert_eq!(updated.refresh_token.unwrap().expose(), "rt_1");
        assert_eq!(updated.expires_at, T0 + 30_000 + 3_600_000);
        assert_eq!(updated.user.unwrap().id, "user-1");
    }

    #[test]
    fn update_tokens_without_session_fails() {
        let (_, _, store) = setup();
        assert!(store.update_tokens("at".into(), None, 60, None).is_err());
    }

    #[test]
    fn remove_session_leaves_credentials() {
        let (kv, _, store) = setup();
        store.write(tokens(3600)).unwrap();
        kv.set(CREDENTIALS_KEY, "{}").unwrap();

        store.remove_session();

        assert!(kv.get(SESSION_KEY).unwrap().is_none());
        assert!(kv.get(CREDENTIALS_KEY).unwrap().is_some());
    }

    #[test]
    fn init_runs_once_and_drops_expired_session() {
        let (kv, clock, store) = setup();
        store.write(tokens(1)).unwrap();
        clock.advance(5_000);

        assert!(store.init());
        assert!(kv.get(SESSION_KEY).unwrap().is_none());
        assert!(!store.init());
    }

    #[test]
    fn profile_keeps_unknown_fields() {
        let json = r#"{"id":"u","display_name":"D","country":"SE","followers":{"total":3}}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("D"));
        assert_eq!(profile.extra["country"], "SE");

        let back = serde_json::to_value(&profile).unwrap();
        assert_eq!(back["followers"]["total"], 3);
    }
}
