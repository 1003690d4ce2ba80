//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from the OAUTH_CLIENT_SECRET env var or
//! client_secret_file, never stored in the TOML directly to avoid leaking
//! secrets.

use common::Secret;
use pipeline::{ClientConfig, HeaderInjection, StaticHeaders};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";
const DEFAULT_CONFIG_FILE: &str = "auth-cli.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Where the app runs and where it keeps its state
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin the app is served from; selects the API base
    pub origin: String,
    /// JSON file holding persisted auth state
    pub storage_path: PathBuf,
    /// Extra fixtures for demo mode, layered over the builtin set
    pub demo_fixtures: Option<PathBuf>,
    pub callback_route: String,
    pub notify_backend_on_logout: bool,
    /// Tear down the session on a 401 from any endpoint, including the
    /// unauthenticated auth endpoints
    pub logout_on_any_401: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5173".into(),
            storage_path: PathBuf::from("auth-state.json"),
            demo_fixtures: None,
            callback_route: auth_flow::DEFAULT_CALLBACK_ROUTE.into(),
            notify_backend_on_logout: true,
            logout_on_any_401: true,
        }
    }
}

/// Client credentials used by `set-credentials`
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to OAUTH_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OAUTH_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.credentials.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.credentials.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.credentials.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        self.client.validate().map_err(common::Error::Config)?;

        let origin = self.origin()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "app.origin must use http or https, got: {}",
                self.app.origin
            )));
        }
        if !self.app.callback_route.starts_with('/') {
            return Err(common::Error::Config(format!(
                "app.callback_route must start with '/', got: {}",
                self.app.callback_route
            )));
        }
        StaticHeaders::new(&self.headers)
            .map_err(|e| common::Error::Config(format!("headers: {e}")))?;
        Ok(())
    }

    pub fn origin(&self) -> common::Result<Url> {
        Url::parse(&self.app.origin).map_err(|e| {
            common::Error::Config(format!(
                "app.origin is not a valid URL ({}): {e}",
                self.app.origin
            ))
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}
