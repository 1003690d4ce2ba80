//! OAuth authorization-code flow for the session client
//!
//! Drives login, the provider callback, token refresh and logout against
//! the backend auth endpoints, persisting results through a
//! [`session::SessionManager`].
//!
//! Flow:
//! 1. Onboarding saves client credentials via `AuthController::save_credentials()`
//! 2. `AuthController::login()` fetches the consent URL and navigates to it
//! 3. The provider redirects back to the callback route; `handle_location()`
//!    exchanges the `code` for a session
//! 4. `AuthController::refresh()` renews the access token in place
//! 5. `AuthController::logout()` clears local state and notifies the backend

pub mod backend;
pub mod controller;
pub mod error;
pub mod state;

pub use backend::{CallbackResponse, RefreshResponse};
pub use controller::{AuthController, DEFAULT_CALLBACK_ROUTE};
pub use error::{Error, Result};
pub use state::{AuthState, CallbackOutcome, Redirect};
