//! Command parsing and execution
//!
//! Every command prints one JSON document on stdout. A command that
//! triggered a full-page navigation (login, or a 401 that sent the user to
//! onboarding) reports the target as `navigated_to`.

use std::sync::Arc;
use std::time::Duration;

use auth_flow::{AuthController, CallbackOutcome};
use clap::{Parser, Subcommand, ValueEnum};
use common::{MemoryNavigator, Navigator, Secret, SystemClock};
use futures_util::future::join_all;
use pipeline::{BearerAuth, DemoFixtures, RequestPipeline, StaticHeaders};
use response_cache::{ResponseCache, cache_key};
use serde_json::{Value, json};
use session::{Credentials, FileStore, SessionManager, validate_format};
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::error::Error;

/// Time allowed for the backend logout notification before the process exits.
const LOGOUT_GRACE: Duration = Duration::from_millis(500);

/// OAuth session client
#[derive(Parser, Debug)]
#[command(name = "auth-cli")]
#[command(version)]
#[command(about = "Drive the OAuth sign-in flow and make authenticated API calls")]
pub struct Cli {
    /// Path to the TOML config (falls back to CONFIG_PATH, then auth-cli.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the current auth state
    Status,

    /// Store client credentials. The secret comes from OAUTH_CLIENT_SECRET or
    /// credentials.client_secret_file
    SetCredentials {
        /// Client ID (defaults to credentials.client_id from config)
        client_id: Option<String>,

        /// Store without asking the backend to validate them first
        #[arg(long)]
        no_validate: bool,
    },

    /// Start the authorization flow and print the provider URL
    Login,

    /// Handle the provider redirect
    Callback {
        /// Full redirect URL, including the query string
        url: Url,
    },

    /// Renew the access token
    Refresh,

    /// Sign out
    Logout,

    /// Toggle demo mode
    Demo {
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Remove all stored auth state
    Clear,

    /// Fetch API paths through the response cache
    Get {
        /// Paths relative to the API base, e.g. /me
        #[arg(required = true, value_parser = api_path)]
        paths: Vec<String>,

        /// Always hit the network and leave the cache untouched
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

fn api_path(raw: &str) -> std::result::Result<String, String> {
    if raw.starts_with('/') {
        Ok(raw.to_owned())
    } else {
        Err(format!("paths start with '/', got {raw:?}"))
    }
}

/// Everything a command needs, wired from config.
pub struct App {
    manager: SessionManager,
    navigator: Arc<MemoryNavigator>,
    pipeline: RequestPipeline,
    controller: AuthController,
    cache: ResponseCache<pipeline::Error>,
    client_id: Option<String>,
    client_secret: Option<Secret<String>>,
    notify_backend_on_logout: bool,
}

impl App {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let store = FileStore::open(config.app.storage_path.clone())?;
        let clock = Arc::new(SystemClock);
        let manager = SessionManager::new(Arc::new(store), clock.clone());

        let origin = config.origin()?;
        let base_url = config.client.base_url_for(&origin)?;
        info!(base_url = %base_url, "API base selected");

        let navigator = Arc::new(MemoryNavigator::new(origin));
        let mut pipeline = RequestPipeline::new(&config.client, base_url, manager.clone())?
            .with_interceptor(Arc::new(StaticHeaders::new(&config.headers)?))
            .with_interceptor(Arc::new(
                BearerAuth::new(manager.clone(), navigator.clone())
                    .logout_on_any_401(config.app.logout_on_any_401),
            ));
        if let Some(path) = &config.app.demo_fixtures {
            pipeline = pipeline.with_fixtures(DemoFixtures::from_file(path)?);
        }

        let controller = AuthController::new(pipeline.clone(), navigator.clone())
            .callback_route(config.app.callback_route)
            .notify_backend_on_logout(config.app.notify_backend_on_logout);

        Ok(Self {
            manager,
            navigator,
            pipeline,
            controller,
            cache: ResponseCache::new(clock),
            client_id: config.credentials.client_id,
            client_secret: config.credentials.client_secret,
            notify_backend_on_logout: config.app.notify_backend_on_logout,
        })
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<Value> {
        let state = self.controller.resolve_initial_state();
        debug!(state = state.label(), ?command, "running command");

        let navigations_before = self.navigator.assigned().len();
        let mut output = self.execute(command).await?;

        if let Some(target) = self.navigator.assigned().get(navigations_before)
            && let Some(obj) = output.as_object_mut()
        {
            obj.insert("navigated_to".into(), json!(target.as_str()));
        }
        Ok(output)
    }

    async fn execute(&self, command: Command) -> anyhow::Result<Value> {
        match command {
            Command::Status => Ok(self.status()),
            Command::SetCredentials {
                client_id,
                no_validate,
            } => {
                let validate = !no_validate;
                let client_id = client_id
                    .or_else(|| self.client_id.clone())
                    .ok_or(Error::MissingClientId)?;
                let secret = self
                    .client_secret
                    .as_ref()
                    .ok_or(Error::MissingClientSecret)?;
                let creds = Credentials::new(client_id, secret.expose().as_str());
                self.controller.save_credentials(&creds, validate).await?;

                let report = validate_format(&creds);
                Ok(json!({
                    "stored": true,
                    "client_id": creds.client_id.trim(),
                    "validated_remotely": validate,
                    "warnings": report.warnings,
                }))
            }
            Command::Login => {
                let redirect = self.controller.login().await?;
                Ok(json!({ "authorize_url": redirect.url.as_str() }))
            }
            Command::Callback { url } => {
                self.navigator.visit(url.clone());
                let outcome = self.controller.handle_location(&url).await?;
                let result = match outcome {
                    CallbackOutcome::NotCallback => json!({ "callback": "not_callback" }),
                    CallbackOutcome::AlreadyHandled => json!({ "callback": "already_handled" }),
                    CallbackOutcome::Authenticated(session) => json!({
                        "callback": "authenticated",
                        "expires_at": session.expires_at,
                        "user": session.user,
                        "location": self.navigator.current_url().as_str(),
                    }),
                };
                Ok(result)
            }
            Command::Refresh => {
                let session = self.controller.refresh().await?;
                Ok(json!({ "refreshed": true, "expires_at": session.expires_at }))
            }
            Command::Logout => {
                let was_demo = self.manager.demo().get();
                self.controller.logout();
                if !was_demo && self.notify_backend_on_logout {
                    tokio::time::sleep(LOGOUT_GRACE).await;
                }
                Ok(json!({ "logged_out": true }))
            }
            Command::Demo { mode } => {
                let enabled = mode == Toggle::On;
                self.manager.demo().set(enabled);
                Ok(json!({ "demo_mode": enabled }))
            }
            Command::Clear => {
                self.manager.clear_all();
                self.cache.clear(None);
                Ok(json!({ "cleared": true }))
            }
            Command::Get { paths, no_cache } => Ok(self.fetch_all(paths, !no_cache).await),
        }
    }

    fn status(&self) -> Value {
        let session = self.manager.session().read();
        json!({
            "state": self.controller.state().label(),
            "authenticated": session.is_authenticated,
            "expires_at": session.is_authenticated.then_some(session.expires_at),
            "user": session.user,
            "demo_mode": self.manager.demo().get(),
            "credentials_stored": self.manager.credentials().exists(),
        })
    }

    /// Fetch every path concurrently. Repeated paths share one request.
    async fn fetch_all(&self, paths: Vec<String>, use_cache: bool) -> Value {
        let fetches = paths.iter().map(|path| {
            let pipeline = self.pipeline.clone();
            let owned = path.clone();
            let key = cache_key(path, Vec::<&str>::new());
            async move {
                let result = self
                    .cache
                    .get::<Value, _, _>(
                        &key,
                        move || async move { pipeline.get_json::<Value>(&owned).await },
                        use_cache,
                    )
                    .await;
                match result {
                    Ok(data) => json!({ "data": data }),
                    Err(e) => json!({ "error": e.to_string() }),
                }
            }
        });
        let results = join_all(fetches).await;

        let mut out = serde_json::Map::new();
        for (path, result) in paths.into_iter().zip(results) {
            out.insert(path, result);
        }
        Value::Object(out)
    }
}
