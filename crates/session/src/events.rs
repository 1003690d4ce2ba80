//! Change signal for independent consumers of auth state
//!
//! Fired whenever credentials, the session, or the demo flag change so other
//! parts of the application can re-read state instead of polling. Delivery
//! is best effort and in-process: a send with no subscribers is dropped and
//! a slow subscriber may observe `Lagged`.

use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before older ones are dropped.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    CredentialsChanged,
    SessionChanged,
    DemoModeChanged(bool),
}

/// Cloneable broadcast handle shared by the stores of one `SessionManager`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AuthEvent) {
        match self.tx.send(event) {
            Ok(receivers) => trace!(receivers, "auth event sent"),
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "auth event dropped, no subscribers")
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
