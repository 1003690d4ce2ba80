//! Session bearer token injection and 401 teardown.

use std::sync::Arc;

use common::Navigator;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use session::SessionManager;
use tracing::{debug, info, warn};

use crate::{Error, ErrorClassification, Interceptor, Result};

/// Auth endpoints that must never carry the session token. They run before
/// a session exists and authenticate with the client credentials instead.
pub const SKIP_AUTH_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/callback",
    "/auth/validate-credentials",
];

/// Pages a 401 does not navigate away from.
pub const PUBLIC_ROUTES: &[&str] = &["/", "/login", "/onboarding"];

pub const ONBOARDING_ROUTE: &str = "/onboarding";

/// `Bearer <token>`, marked sensitive so it never shows up in debug output.
pub(crate) fn bearer_header(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::InvalidHeader(format!("authorization: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

fn is_skipped(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    SKIP_AUTH_PATHS.contains(&path)
}

pub struct BearerAuth {
    manager: SessionManager,
    navigator: Arc<dyn Navigator>,
    logout_on_any_401: bool,
}

impl BearerAuth {
    pub fn new(manager: SessionManager, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            manager,
            navigator,
            logout_on_any_401: true,
        }
    }

    /// When false, a 401 from a skip-listed endpoint (which never carried
    /// the session token) leaves the session alone.
    pub fn logout_on_any_401(mut self, enabled: bool) -> Self {
        self.logout_on_any_401 = enabled;
        self
    }

    fn teardown(&self) {
        self.manager.session().clear();

        let current = self.navigator.current_path();
        if PUBLIC_ROUTES.contains(&current.as_str()) {
            debug!(path = %current, "401 on public route, staying put");
            return;
        }

        match self.navigator.current_url().join(ONBOARDING_ROUTE) {
            Ok(target) => {
                info!(from = %current, "session rejected, sending user to onboarding");
                self.navigator.assign(&target);
            }
            Err(e) => warn!(error = %e, "failed to build onboarding URL"),
        }
    }
}

impl Interceptor for BearerAuth {
    fn id(&self) -> &str {
        "bearer"
    }

    fn prepare_request(&self, path: &str, headers: &mut HeaderMap) -> Result<()> {
        if is_skipped(path) {
            return Ok(());
        }
        let Some(token) = self.manager.token() else {
            debug!(path, "no session, sending unauthenticated");
            return Ok(());
        };

        headers.insert(AUTHORIZATION, bearer_header(&token)?);
        Ok(())
    }

    fn report_error(&self, path: &str, classification: ErrorClassification) {
        if classification != ErrorClassification::Unauthorized {
            return;
        }
        if !self.logout_on_any_401 && is_skipped(path) {
            debug!(path, "401 from unauthenticated endpoint, keeping session");
            return;
        }
        self.teardown();
    }
}
