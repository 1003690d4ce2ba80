use thiserror::Error;

/// Failures surfaced by [`crate::RequestPipeline`].
///
/// `Clone` so results can be shared between callers coalesced on one
/// in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("demo mode is active, {0} requests are disabled")]
    DemoMode(String),

    #[error("no demo fixture for {0}")]
    DemoFixtureMissing(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Transport failures worth another attempt on an idempotent request.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout | Error::Http(_) => true,
            Error::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_decode() {
            Error::Decode(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
