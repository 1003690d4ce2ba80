//! Third-party application credentials
//!
//! The client id/secret pair the user registers with the provider and
//! enters during onboarding. Nothing here talks to the network except
//! `validate_remote`, which asks the backend whether the provider accepts
//! the pair.

use std::sync::Arc;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::events::{AuthEvent, EventBus};
use crate::keys::{CREDENTIALS_KEY, LEGACY_CREDENTIALS_KEY};
use crate::storage::KeyValueStore;

/// Below this many characters a field is suspicious but still accepted by
/// format validation; only the provider can say it is wrong.
pub const MIN_SUSPECT_LEN: usize = 10;

/// Message reported when the validation endpoint cannot be reached.
pub const NETWORK_ERROR: &str = "Network error";

/// Provider application credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
        }
    }

    /// Copy with both fields trimmed.
    pub fn trimmed(&self) -> Self {
        Self::new(self.client_id.trim(), self.client_secret.expose().trim())
    }
}

/// Outcome of local format validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of asking the backend to validate credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValidation {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl RemoteValidation {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Check both fields are present. Short values produce warnings only.
pub fn validate_format(creds: &Credentials) -> ValidationReport {
    let mut report = ValidationReport::default();

    let client_id = creds.client_id.trim();
    let client_secret = creds.client_secret.expose().trim();

    if client_id.is_empty() {
        report.errors.push("Client ID is required".into());
    } else if client_id.len() < MIN_SUSPECT_LEN {
        report.warnings.push("Client ID looks too short".into());
    }

    if client_secret.is_empty() {
        report.errors.push("Client Secret is required".into());
    } else if client_secret.len() < MIN_SUSPECT_LEN {
        report.warnings.push("Client Secret looks too short".into());
    }

    report.is_valid = report.errors.is_empty();
    report
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    is_valid: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Ask the backend whether the provider accepts `creds`.
///
/// Never fails: transport errors become `{is_valid: false, error: "Network
/// error"}` and a non-success status carries the backend's message when it
/// sent one.
pub async fn validate_remote(
    client: &reqwest::Client,
    endpoint: &Url,
    creds: &Credentials,
) -> RemoteValidation {
    let creds = creds.trimmed();
    let response = client
        .post(endpoint.clone())
        .json(&ValidateRequest {
            client_id: &creds.client_id,
            client_secret: creds.client_secret.expose(),
        })
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "credential validation request failed");
            return RemoteValidation::rejected(NETWORK_ERROR);
        }
    };

    let status = response.status();
    let parsed = response.json::<ValidateResponse>().await;
    match parsed {
        Ok(body) if status.is_success() => RemoteValidation {
            is_valid: body.is_valid,
            error: if body.is_valid {
                None
            } else {
                Some(body.error.unwrap_or_else(|| "Invalid credentials".into()))
            },
        },
        Ok(body) => RemoteValidation::rejected(
            body.error.unwrap_or_else(|| format!("Validation failed ({status})")),
        ),
        Err(e) => {
            debug!(error = %e, %status, "unreadable validation response");
            RemoteValidation::rejected(format!("Validation failed ({status})"))
        }
    }
}

/// Credential persistence under the canonical key.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    events: EventBus,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Persist `creds` (trimmed) if they pass format validation; otherwise do
    /// nothing.
    pub fn store(&self, creds: &Credentials) {
        let report = validate_format(creds);
        if !report.is_valid {
            debug!(errors = ?report.errors, "refusing to store invalid credentials");
            return;
        }

        let json = match serde_json::to_string(&creds.trimmed()) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize credentials");
                return;
            }
        };
        match self.store.set(CREDENTIALS_KEY, &json) {
            Ok(()) => {
                info!(client_id = %creds.client_id.trim(), "stored credentials");
                self.events.emit(AuthEvent::CredentialsChanged);
            }
            Err(e) => warn!(error = %e, "failed to persist credentials"),
        }
    }

    /// Stored credentials, or `None` when missing or unreadable.
    pub fn load(&self) -> Option<Credentials> {
        read_credentials(self.store.as_ref(), CREDENTIALS_KEY)
    }

    /// Whether usable credentials are stored.
    pub fn exists(&self) -> bool {
        self.load().is_some()
    }

    pub fn clear(&self) {
        match self.store.remove(CREDENTIALS_KEY) {
            Ok(()) => self.events.emit(AuthEvent::CredentialsChanged),
            Err(e) => warn!(error = %e, "failed to remove credentials"),
        }
    }

    /// Move credentials left under the legacy key to the canonical key.
    ///
    /// Canonical credentials win if both exist. The legacy key is removed
    /// either way, so after one run there is a single place to read from.
    /// Returns true when credentials were moved.
    pub fn migrate_legacy(&self) -> bool {
        let legacy_present = matches!(self.store.get(LEGACY_CREDENTIALS_KEY), Ok(Some(_)));
        if !legacy_present {
            return false;
        }

        let legacy = read_credentials(self.store.as_ref(), LEGACY_CREDENTIALS_KEY);
        let moved = match legacy {
            Some(creds) if !self.exists() => {
                self.store(&creds);
                info!("migrated credentials from legacy storage");
                true
            }
            _ => false,
        };

        if let Err(e) = self.store.remove(LEGACY_CREDENTIALS_KEY) {
            warn!(error = %e, "failed to remove legacy credentials");
        }
        moved
    }
}

fn read_credentials(store: &dyn KeyValueStore, key: &str) -> Option<Credentials> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "failed to read credentials");
            return None;
        }
    };

    let creds: Credentials = match serde_json::from_str(&raw) {
        Ok(c) => c,
        Err(e) => {
            debug!(key, error = %e, "ignoring malformed credentials");
            return None;
        }
    };

    validate_format(&creds).is_valid.then_some(creds)
}
