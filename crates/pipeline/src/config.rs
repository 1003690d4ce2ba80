//! HTTP client settings (`[client]` section).

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Hostnames that select the local API base.
pub const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

const DEFAULT_LOCAL_BASE: &str = "http://localhost:3001/api";
const DEFAULT_DEPLOYED_PATH: &str = "/api";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base used when the app runs on a local host
    pub local_base_url: String,

    /// API base for any other host. Defaults to `/api` on the app origin.
    pub deployed_base_url: Option<String>,

    /// Overrides the hostname taken from the app origin
    pub hostname: Option<String>,

    pub timeout_secs: u64,

    /// Extra attempts for idempotent GETs. 0 disables retries.
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_base_url: DEFAULT_LOCAL_BASE.to_owned(),
            deployed_base_url: None,
            hostname: None,
            timeout_secs: 30,
            max_retries: 2,
            retry_base_delay_ms: 200,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Pick the API base for an app served from `origin`.
    pub fn base_url_for(&self, origin: &Url) -> Result<Url> {
        let host = match &self.hostname {
            Some(h) => h.as_str(),
            None => origin.host_str().unwrap_or_default(),
        };

        if LOCAL_HOSTS.contains(&host) {
            return parse_base(&self.local_base_url);
        }
        match &self.deployed_base_url {
            Some(url) => parse_base(url),
            None => origin
                .join(DEFAULT_DEPLOYED_PATH)
                .map_err(|e| Error::InvalidUrl(format!("{origin}: {e}"))),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("client.timeout_secs must be greater than zero".into());
        }
        check_http("client.local_base_url", &self.local_base_url)?;
        if let Some(url) = &self.deployed_base_url {
            check_http("client.deployed_base_url", url)?;
        }
        Ok(())
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))
}

fn check_http(field: &str, raw: &str) -> std::result::Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{field} must use http or https, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_base_delay(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn local_hosts_use_local_base() {
        let config = ClientConfig::default();
        for origin in [
            "http://localhost:5173",
            "http://127.0.0.1:8080",
            "http://[::1]:5173",
        ] {
            assert_eq!(
                config.base_url_for(&url(origin)).unwrap().as_str(),
                "http://localhost:3001/api",
                "{origin}"
            );
        }
    }

    #[test]
    fn deployed_host_defaults_to_origin_api() {
        let config = ClientConfig::default();
        let base = config
            .base_url_for(&url("https://stats.example.com/dashboard"))
            .unwrap();
        assert_eq!(base.as_str(), "https://stats.example.com/api");
    }

    #[test]
    fn explicit_deployed_base_and_hostname_override() {
        let config = ClientConfig {
            deployed_base_url: Some("https://api.example.com/v1".into()),
            hostname: Some("example.com".into()),
            ..Default::default()
        };
        let base = config.base_url_for(&url("http://localhost:5173")).unwrap();
        assert_eq!(base.as_str(), "https://api.example.com/v1");
    }

    #[test]
    fn rejects_zero_timeout_and_bad_scheme() {
        let config = ClientConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("timeout_secs"));

        let config = ClientConfig {
            deployed_base_url: Some("ftp://example.com".into()),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("http or https"));
    }

    #[test]
    fn deserializes_partial_section() {
        let config: ClientConfig =
            toml::from_str("max_retries = 0\nlocal_base_url = \"http://127.0.0.1:9000\"").unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.local_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.timeout_secs, 30);
    }
}
