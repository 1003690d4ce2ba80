use session::Session;
use url::Url;

/// Where the authorization flow currently stands.
///
/// Transitions:
/// - Unauthenticated → AwaitingRedirect (login requested)
/// - AwaitingRedirect → AwaitingCallback (navigated to the provider)
/// - AwaitingRedirect → Unauthenticated (backend refused the login)
/// - AwaitingCallback → Authenticated (code exchanged)
/// - AwaitingCallback → Unauthenticated (exchange failed or provider denied)
/// - Authenticated → Refreshing → Authenticated | Unauthenticated
/// - any → Unauthenticated (logout)
/// - Demo is entered only through initial-state resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingRedirect,
    AwaitingCallback,
    Authenticated,
    Refreshing,
    Demo,
}

impl AuthState {
    /// Status label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::AwaitingRedirect => "awaiting_redirect",
            AuthState::AwaitingCallback => "awaiting_callback",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
            AuthState::Demo => "demo",
        }
    }
}

/// Returned by `login` after the full-page navigation has been issued.
///
/// The page that called `login` has been left; callers stop here.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: Url,
}

/// Result of inspecting a location for an OAuth callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Not on the callback route, or no `code` present
    NotCallback,
    /// This code was already exchanged
    AlreadyHandled,
    Authenticated(Session),
}
