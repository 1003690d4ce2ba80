//! Persisted authentication state
//!
//! Owns everything the client keeps between page loads: the third-party
//! application credentials, the authenticated session and the demo-mode
//! flag. All three live in a single [`KeyValueStore`] namespace and are
//! reached through an injectable [`SessionManager`], so tests build
//! isolated instances instead of sharing ambient globals.
//!
//! Lifecycle:
//! 1. Onboarding stores credentials via `CredentialStore::store()`
//! 2. A successful code exchange writes the session via `SessionStore::write()`
//! 3. Reads lazily discard an expired session (`SessionStore::read()`)
//! 4. Logout or a 401 anywhere sweeps every auth-owned key (`SessionStore::clear()`)

pub mod credentials;
pub mod demo;
pub mod events;
pub mod keys;
pub mod manager;
pub mod session;
pub mod storage;

pub use credentials::{
    CredentialStore, Credentials, RemoteValidation, ValidationReport, validate_format,
    validate_remote,
};
pub use demo::DemoModeSwitch;
pub use events::{AuthEvent, EventBus};
pub use manager::SessionManager;
pub use session::{Profile, Session, SessionStore, TokenData};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
