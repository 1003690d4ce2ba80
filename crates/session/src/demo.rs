//! Demo mode flag
//!
//! While set, consumers serve fixture data and never call the backend.
//! Components read the flag by value before any network call; it is not
//! injected as a separate strategy.

use std::sync::Arc;

use tracing::{info, warn};

use crate::events::{AuthEvent, EventBus};
use crate::keys::{DEMO_MODE_KEY, SESSION_KEY};
use crate::storage::KeyValueStore;

#[derive(Clone)]
pub struct DemoModeSwitch {
    store: Arc<dyn KeyValueStore>,
    events: EventBus,
}

impl DemoModeSwitch {
    pub fn new(store: Arc<dyn KeyValueStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Unreadable storage counts as off.
    pub fn get(&self) -> bool {
        match self.store.get(DEMO_MODE_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                warn!(error = %e, "failed to read demo flag");
                false
            }
        }
    }

    /// Turning demo mode on also purges any provider-issued tokens so a
    /// real session cannot show through demo views.
    pub fn set(&self, enabled: bool) {
        let result = if enabled {
            self.purge_tokens();
            self.store.set(DEMO_MODE_KEY, "true")
        } else {
            self.store.remove(DEMO_MODE_KEY)
        };

        match result {
            Ok(()) => {
                info!(enabled, "demo mode changed");
                self.events.emit(AuthEvent::DemoModeChanged(enabled));
            }
            Err(e) => warn!(enabled, error = %e, "failed to persist demo flag"),
        }
    }

    fn purge_tokens(&self) {
        let mut doomed = vec![SESSION_KEY.to_owned()];
        if let Ok(keys) = self.store.keys() {
            doomed.extend(
                keys.into_iter()
                    .filter(|k| k.to_ascii_lowercase().contains("token")),
            );
        }
        match self.store.remove_many(&doomed) {
            Ok(()) => self.events.emit(AuthEvent::SessionChanged),
            Err(e) => warn!(error = %e, "failed to purge tokens for demo mode"),
        }
    }
}
