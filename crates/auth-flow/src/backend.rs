//! Backend auth endpoints
//!
//! The backend proxies the provider's token endpoint so the client secret
//! never has to reach the provider from the client directly:
//! 1. `POST /auth/login` returns the provider consent URL
//! 2. `POST /auth/callback` exchanges the authorization code for tokens
//! 3. `POST /auth/refresh` renews the access token
//! 4. `POST /auth/logout` lets the backend drop its side (best effort)
//!
//! `expires_in` is a delta in seconds from the response time. The session
//! store converts it to an absolute unix millisecond timestamp.

use pipeline::RequestPipeline;
use serde::{Deserialize, Serialize};
use session::{Credentials, Profile};
use url::Url;

use crate::error::{Error, Result};

pub const LOGIN_PATH: &str = "/auth/login";
pub const CALLBACK_PATH: &str = "/auth/callback";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const VALIDATE_CREDENTIALS_PATH: &str = "/auth/validate-credentials";

/// Lifetime assumed when a refresh response omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Serialize)]
struct LoginRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth_url: String,
}

#[derive(Serialize)]
struct CallbackRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Response from the code exchange.
#[derive(Debug, Deserialize)]
pub struct CallbackResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    pub user: Profile,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

/// Response from a token refresh. Only the access token is guaranteed.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub user: Option<Profile>,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

/// Ask the backend for the provider consent URL.
pub async fn request_auth_url(pipeline: &RequestPipeline, creds: &Credentials) -> Result<Url> {
    let body = LoginRequest {
        client_id: &creds.client_id,
        client_secret: creds.client_secret.expose(),
    };
    let response: LoginResponse = pipeline.post_json(LOGIN_PATH, &body).await?;
    Url::parse(&response.auth_url)
        .map_err(|e| Error::TokenExchange(format!("invalid auth_url {:?}: {e}", response.auth_url)))
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    pipeline: &RequestPipeline,
    code: &str,
    creds: &Credentials,
) -> Result<CallbackResponse> {
    let body = CallbackRequest {
        code,
        client_id: &creds.client_id,
        client_secret: creds.client_secret.expose(),
    };
    Ok(pipeline.post_json(CALLBACK_PATH, &body).await?)
}

pub async fn refresh_token(
    pipeline: &RequestPipeline,
    refresh: Option<&str>,
) -> Result<RefreshResponse> {
    let body = RefreshRequest {
        refresh_token: refresh,
    };
    Ok(pipeline.post_json(REFRESH_PATH, &body).await?)
}

/// Tell the backend which session ended. The token is passed explicitly
/// because the local session is already gone by the time this runs.
pub async fn notify_logout(pipeline: &RequestPipeline, access_token: Option<&str>) -> Result<()> {
    match access_token {
        Some(token) => Ok(pipeline.post_no_content_as(LOGOUT_PATH, token).await?),
        None => Ok(pipeline.post_no_content(LOGOUT_PATH).await?),
    }
}
