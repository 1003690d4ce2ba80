//! Authorization-code flow state machine
//!
//! The controller owns the user-visible auth state and drives it through
//! the backend endpoints. It never holds tokens itself: the session store
//! is the single source of truth and the controller re-reads it whenever a
//! decision depends on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::{MutexExt, Navigator, Secret};
use pipeline::RequestPipeline;
use session::{
    Credentials, Session, SessionManager, TokenData, validate_format, validate_remote,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{self, VALIDATE_CREDENTIALS_PATH};
use crate::error::{Error, Result};
use crate::state::{AuthState, CallbackOutcome, Redirect};

pub const DEFAULT_CALLBACK_ROUTE: &str = "/callback";

/// Query parameters consumed by the callback and removed from the address
/// bar afterwards.
const OAUTH_PARAMS: &[&str] = &["code", "state"];

/// Clears the callback latch when the exchange finishes, however it ends.
struct CallbackLatch<'a>(&'a AtomicBool);

impl Drop for CallbackLatch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct AuthController {
    manager: SessionManager,
    pipeline: RequestPipeline,
    navigator: Arc<dyn Navigator>,
    state: Mutex<AuthState>,
    processing_callback: AtomicBool,
    /// Most recent code sent to the backend, whatever the outcome
    last_code: Mutex<Option<String>>,
    callback_route: String,
    notify_backend_on_logout: bool,
}

impl AuthController {
    pub fn new(pipeline: RequestPipeline, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            manager: pipeline.manager().clone(),
            pipeline,
            navigator,
            state: Mutex::new(AuthState::Unauthenticated),
            processing_callback: AtomicBool::new(false),
            last_code: Mutex::new(None),
            callback_route: DEFAULT_CALLBACK_ROUTE.to_owned(),
            notify_backend_on_logout: true,
        }
    }

    /// Path on which `handle_location` looks for the provider redirect.
    pub fn callback_route(mut self, route: impl Into<String>) -> Self {
        self.callback_route = route.into();
        self
    }

    pub fn notify_backend_on_logout(mut self, enabled: bool) -> Self {
        self.notify_backend_on_logout = enabled;
        self
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock_or_recover()
    }

    fn transition(&self, next: AuthState) {
        let mut state = self.state.lock_or_recover();
        if *state != next {
            info!(from = state.label(), to = next.label(), "auth state changed");
            *state = next;
        }
    }

    /// Settle the state on startup from what storage holds.
    pub fn resolve_initial_state(&self) -> AuthState {
        self.manager.init();

        let state = if self.manager.demo().get() {
            AuthState::Demo
        } else if self.manager.session().is_valid() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        self.transition(state);
        state
    }

    /// Start the authorization-code flow.
    ///
    /// On success the navigator has already been sent to the provider's
    /// consent page; the returned [`Redirect`] only reports where.
    pub async fn login(&self) -> Result<Redirect> {
        if self.manager.demo().get() {
            return Err(Error::DemoModeActive);
        }
        let creds = self
            .manager
            .credentials()
            .load()
            .ok_or(Error::MissingCredentials)?;

        self.transition(AuthState::AwaitingRedirect);
        let url = match backend::request_auth_url(&self.pipeline, &creds).await {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "login request failed");
                self.transition(AuthState::Unauthenticated);
                return Err(e);
            }
        };

        info!(host = url.host_str().unwrap_or_default(), "redirecting to provider");
        self.navigator.assign(&url);
        self.transition(AuthState::AwaitingCallback);
        Ok(Redirect { url })
    }

    /// Exchange an authorization code for a session.
    ///
    /// Only one exchange runs at a time; a second call while one is in
    /// flight fails with `CallbackInProgress`. On failure any partial
    /// session is removed, leaving stored credentials intact.
    pub async fn handle_oauth_callback(&self, code: &str) -> Result<Session> {
        if self.processing_callback.swap(true, Ordering::SeqCst) {
            debug!("callback already in progress");
            return Err(Error::CallbackInProgress);
        }
        let _latch = CallbackLatch(&self.processing_callback);

        if self.manager.demo().get() {
            return Err(Error::DemoModeActive);
        }

        // Credentials saved by older releases live under the legacy key
        self.manager.init();
        let Some(creds) = self.manager.credentials().load() else {
            warn!("callback received without stored credentials");
            self.transition(AuthState::Unauthenticated);
            return Err(Error::MissingCredentials);
        };

        self.transition(AuthState::AwaitingCallback);
        // Spent once sent, even if the exchange fails
        *self.last_code.lock_or_recover() = Some(code.to_owned());
        match self.exchange(code, &creds).await {
            Ok(session) => {
                self.strip_oauth_params();
                self.transition(AuthState::Authenticated);
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "code exchange failed");
                self.manager.session().remove_session();
                self.transition(AuthState::Unauthenticated);
                Err(e)
            }
        }
    }

    async fn exchange(&self, code: &str, creds: &Credentials) -> Result<Session> {
        let tokens = backend::exchange_code(&self.pipeline, code, creds).await?;
        let session = self.manager.session().write(TokenData {
            access_token: Secret::new(tokens.access_token),
            refresh_token: tokens.refresh_token.map(Secret::new),
            expires_in: tokens.expires_in,
            user: tokens.user,
        })?;
        info!(user_id = ?session.user.as_ref().map(|u| u.id.as_str()), "signed in");
        Ok(session)
    }

    /// Inspect a location the app has been routed to.
    ///
    /// Only the callback route is examined. A provider `error` parameter is
    /// reported as `ProviderDenied`; a fresh `code` is exchanged.
    pub async fn handle_location(&self, url: &Url) -> Result<CallbackOutcome> {
        if url.path() != self.callback_route {
            return Ok(CallbackOutcome::NotCallback);
        }

        let mut code = None;
        let mut error = None;
        let mut description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            let reason = description.unwrap_or(error);
            warn!(reason = %reason, "provider denied authorization");
            self.transition(AuthState::Unauthenticated);
            return Err(Error::ProviderDenied(reason));
        }

        let Some(code) = code else {
            return Ok(CallbackOutcome::NotCallback);
        };
        if self.last_code.lock_or_recover().as_deref() == Some(code.as_str()) {
            debug!("callback code already handled");
            return Ok(CallbackOutcome::AlreadyHandled);
        }

        let session = self.handle_oauth_callback(&code).await?;
        Ok(CallbackOutcome::Authenticated(session))
    }

    /// Renew the access token. A failed refresh ends the session.
    pub async fn refresh(&self) -> Result<Session> {
        if self.manager.demo().get() {
            return Err(Error::DemoModeActive);
        }
        let current = self.manager.session().read();
        if !current.is_authenticated {
            return Err(Error::NotAuthenticated);
        }

        self.transition(AuthState::Refreshing);
        let refresh = current.refresh_token.as_ref().map(|t| t.expose().as_str());
        let result = match backend::refresh_token(&self.pipeline, refresh).await {
            Ok(tokens) => self
                .manager
                .session()
                .update_tokens(
                    Secret::new(tokens.access_token),
                    tokens.refresh_token.map(Secret::new),
                    tokens.expires_in,
                    tokens.user,
                )
                .map_err(Error::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                info!(expires_at = session.expires_at, "session refreshed");
                self.transition(AuthState::Authenticated);
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, ending session");
                self.manager.session().clear();
                self.transition(AuthState::Unauthenticated);
                Err(e)
            }
        }
    }

    /// Sign out locally and, outside demo mode, tell the backend without
    /// waiting for it.
    pub fn logout(&self) {
        let was_demo = self.manager.demo().get();
        let token = self.manager.token();
        self.manager.session().clear();
        self.manager.demo().set(false);
        self.transition(AuthState::Unauthenticated);
        info!(was_demo, "logged out");

        if was_demo || !self.notify_backend_on_logout {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, skipping backend logout notification");
            return;
        };
        let pipeline = self.pipeline.clone();
        handle.spawn(async move {
            if let Err(e) = backend::notify_logout(&pipeline, token.as_deref()).await {
                debug!(error = %e, "backend logout notification failed");
            }
        });
    }

    /// Onboarding: check credentials and store them.
    ///
    /// With `validate_remotely` the backend is asked to confirm them first,
    /// which is not possible in demo mode.
    pub async fn save_credentials(
        &self,
        creds: &Credentials,
        validate_remotely: bool,
    ) -> Result<()> {
        let report = validate_format(creds);
        if !report.is_valid {
            return Err(Error::InvalidCredentialsFormat(report.errors));
        }
        for warning in &report.warnings {
            debug!(warning = %warning, "credential format warning");
        }

        if validate_remotely {
            if self.manager.demo().get() {
                return Err(Error::DemoModeActive);
            }
            let endpoint = self.pipeline.endpoint(VALIDATE_CREDENTIALS_PATH)?;
            let verdict = validate_remote(self.pipeline.client(), &endpoint, creds).await;
            if !verdict.is_valid {
                let reason = verdict
                    .error
                    .unwrap_or_else(|| "Invalid credentials".to_owned());
                return Err(Error::RemoteValidationFailure(reason));
            }
        }

        self.manager.credentials().store(creds);
        Ok(())
    }

    fn strip_oauth_params(&self) {
        let current = self.navigator.current_url();
        if !current
            .query_pairs()
            .any(|(k, _)| OAUTH_PARAMS.contains(&k.as_ref()))
        {
            return;
        }

        let kept: Vec<(String, String)> = current
            .query_pairs()
            .filter(|(k, _)| !OAUTH_PARAMS.contains(&k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut clean = current.clone();
        if kept.is_empty() {
            clean.set_query(None);
        } else {
            clean.query_pairs_mut().clear().extend_pairs(&kept);
        }
        self.navigator.replace(&clean);
    }
}
