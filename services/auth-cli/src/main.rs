//! OAuth session client
//!
//! Command-line front end for the client-side auth core:
//! 1. Stores third-party application credentials
//! 2. Drives the authorization-code flow through the backend
//! 3. Persists the session between invocations
//! 4. Issues authenticated, cached API requests (or serves demo fixtures)
//!
//! Logs go to stderr as JSON; command results go to stdout.

mod commands;
mod config;
mod error;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{App, Cli};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        origin = %config.app.origin,
        storage = %config.app.storage_path.display(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let app = App::build(config).context("failed to initialize auth client")?;
    let output = app.run(cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
