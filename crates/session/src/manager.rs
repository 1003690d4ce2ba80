//! Injectable facade over the auth stores
//!
//! One `SessionManager` per app instance. Clones share the same storage and
//! event bus, so tests build their own instead of touching a global.

use std::sync::Arc;

use common::{Clock, SystemClock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::demo::DemoModeSwitch;
use crate::events::{AuthEvent, EventBus};
use crate::keys::{DEMO_MODE_KEY, is_auth_owned};
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, MemoryStore};

/// Owns the three auth stores over one shared namespace.
///
/// Cheap to clone; clones share storage, clock and the change channel.
/// Build one per process (or per test) and pass it down explicitly.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    credentials: CredentialStore,
    session: SessionStore,
    demo: DemoModeSwitch,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let events = EventBus::new();
        Self {
            credentials: CredentialStore::new(store.clone(), events.clone()),
            session: SessionStore::new(store.clone(), clock.clone(), events.clone()),
            demo: DemoModeSwitch::new(store.clone(), events.clone()),
            store,
            clock,
            events,
        }
    }

    /// Fresh isolated manager on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn demo(&self) -> &DemoModeSwitch {
        &self.demo
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Startup hook: drop an expired session and move credentials saved under
    /// the legacy key. Safe to call more than once.
    pub fn init(&self) {
        let first = self.session.init();
        let migrated = self.credentials.migrate_legacy();
        if first || migrated {
            debug!(migrated, "session manager initialized");
        }
    }

    /// Current bearer token, if the session is authenticated and live.
    pub fn token(&self) -> Option<String> {
        self.session.read().bearer().map(str::to_owned)
    }

    /// Remove every auth-owned key and the demo flag.
    pub fn clear_all(&self) {
        self.session.clear();
        if let Err(e) = self.store.remove(DEMO_MODE_KEY) {
            warn!(error = %e, "failed to remove demo flag");
        }
        self.events.emit(AuthEvent::DemoModeChanged(false));

        let leftover = self
            .store
            .keys()
            .map(|keys| keys.into_iter().filter(|k| is_auth_owned(k)).count())
            .unwrap_or_default();
        info!(leftover, "cleared all auth state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::keys::{CREDENTIALS_KEY, LEGACY_CREDENTIALS_KEY, SESSION_KEY};
    use crate::session::{Profile, TokenData};
    use common::ManualClock;

    fn manager() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionManager) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mgr = SessionManager::new(kv.clone(), clock.clone());
        (kv, clock, mgr)
    }

    fn tokens() -> TokenData {
        TokenData {
            access_token: "at".into(),
            refresh_token: None,
            expires_in: 60,
            user: Profile {
                id: "u".into(),
                display_name: None,
                email: None,
                extra: Default::default(),
            },
        }
    }

    #[test]
    fn instances_are_isolated() {
        let a = SessionManager::in_memory();
        let b = SessionManager::in_memory();
        a.credentials().store(&Credentials::new("abcdefghijkl", "secretsecret"));
        assert!(a.credentials().exists());
        assert!(!b.credentials().exists());
    }

    #[test]
    fn token_follows_session_expiry() {
        let (_, clock, mgr) = manager();
        assert!(mgr.token().is_none());

        mgr.session().write(tokens()).unwrap();
        assert_eq!(mgr.token().as_deref(), Some("at"));

        clock.advance(60_000);
        assert!(mgr.token().is_none());
    }

    #[test]
    fn init_migrates_legacy_credentials() {
        let (kv, _, mgr) = manager();
        kv.set(
            LEGACY_CREDENTIALS_KEY,
            r#"{"clientId":"abcdefghijkl","clientSecret":"secretsecret"}"#,
        )
        .unwrap();

        mgr.init();

        assert!(kv.get(LEGACY_CREDENTIALS_KEY).unwrap().is_none());
        assert!(kv.get(CREDENTIALS_KEY).unwrap().is_some());
        // Second call is a no-op
        mgr.init();
        assert!(mgr.credentials().exists());
    }

    #[test]
    fn clear_all_removes_demo_flag_too() {
        let (kv, _, mgr) = manager();
        mgr.session().write(tokens()).unwrap();
        mgr.demo().set(true);
        kv.set("unrelated", "1").unwrap();

        mgr.clear_all();

        assert!(!mgr.demo().get());
        assert!(kv.get(SESSION_KEY).unwrap().is_none());
        assert_eq!(kv.keys().unwrap(), vec!["unrelated".to_owned()]);
    }

    #[test]
    fn clones_share_state() {
        let (_, _, mgr) = manager();
        let other = mgr.clone();
        mgr.demo().set(true);
        assert!(other.demo().get());
    }
}
