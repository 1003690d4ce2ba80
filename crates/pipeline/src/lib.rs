//! Outbound request pipeline
//!
//! Every backend call goes through [`RequestPipeline`], which runs the
//! registered [`Interceptor`]s before sending and reports failures back to
//! them afterwards. The bearer interceptor attaches the session token and
//! tears the session down on 401; static header injection covers the
//! `[[headers]]` config. Demo mode short-circuits the network entirely.

pub mod bearer;
pub mod client;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod headers;
mod metrics;

pub use bearer::BearerAuth;
pub use client::RequestPipeline;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use fixtures::DemoFixtures;
pub use headers::{HeaderInjection, StaticHeaders};

use reqwest::header::HeaderMap;

/// What a failed response means for the caller and the interceptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Worth retrying for idempotent requests (502/503/504, timeouts)
    Transient,
    /// 401: the session is no longer accepted
    Unauthorized,
    /// Any other status, handed to the caller unchanged
    Passthrough,
}

impl ErrorClassification {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            502..=504 => Self::Transient,
            _ => Self::Passthrough,
        }
    }
}

/// Hook run around each outbound request.
///
/// `prepare_request` sees the request path (relative to the API base) and
/// may add headers. `report_error` is told how a failed response was
/// classified; most interceptors ignore it.
pub trait Interceptor: Send + Sync {
    /// Identifier for logging (e.g. "bearer", "static-headers")
    fn id(&self) -> &str;

    fn prepare_request(&self, path: &str, headers: &mut HeaderMap) -> Result<()>;

    fn report_error(&self, _path: &str, _classification: ErrorClassification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            ErrorClassification::from_status(401),
            ErrorClassification::Unauthorized
        );
        for status in [502, 503, 504] {
            assert_eq!(
                ErrorClassification::from_status(status),
                ErrorClassification::Transient
            );
        }
        for status in [400, 403, 404, 429, 500] {
            assert_eq!(
                ErrorClassification::from_status(status),
                ErrorClassification::Passthrough
            );
        }
    }
}
