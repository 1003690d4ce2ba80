//! Error types for the authorization flow

/// Errors from `AuthController` operations.
///
/// An expired session is not an error: reads clear it and report the
/// unauthenticated zero value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no client credentials stored")]
    MissingCredentials,

    #[error("invalid credentials: {}", .0.join(", "))]
    InvalidCredentialsFormat(Vec<String>),

    #[error("credentials rejected: {0}")]
    RemoteValidationFailure(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("demo mode is active")]
    DemoModeActive,

    #[error("an OAuth callback is already being processed")]
    CallbackInProgress,

    #[error("authorization denied by provider: {0}")]
    ProviderDenied(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("storage error: {0}")]
    Storage(#[from] common::Error),
}

impl From<pipeline::Error> for Error {
    fn from(e: pipeline::Error) -> Self {
        match e {
            pipeline::Error::Unauthorized => Error::Unauthorized,
            pipeline::Error::Http(msg) => Error::Network(msg),
            pipeline::Error::Timeout => Error::Network("request timed out".into()),
            pipeline::Error::Status { status, body } => {
                Error::TokenExchange(format!("backend returned {status}: {body}"))
            }
            pipeline::Error::Decode(msg) => {
                Error::TokenExchange(format!("invalid backend response: {msg}"))
            }
            pipeline::Error::DemoMode(_) | pipeline::Error::DemoFixtureMissing(_) => {
                Error::DemoModeActive
            }
            e @ (pipeline::Error::InvalidHeader(_) | pipeline::Error::InvalidUrl(_)) => {
                Error::Network(e.to_string())
            }
        }
    }
}

/// Result alias for auth flow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_onto_taxonomy() {
        assert!(matches!(
            Error::from(pipeline::Error::Unauthorized),
            Error::Unauthorized
        ));
        assert!(matches!(
            Error::from(pipeline::Error::Timeout),
            Error::Network(_)
        ));
        assert!(matches!(
            Error::from(pipeline::Error::DemoMode("POST".into())),
            Error::DemoModeActive
        ));

        let err = Error::from(pipeline::Error::Status {
            status: 400,
            body: "bad code".into(),
        });
        assert_eq!(
            err.to_string(),
            "token exchange failed: backend returned 400: bad code"
        );
    }

    #[test]
    fn format_errors_are_listed() {
        let err = Error::InvalidCredentialsFormat(vec![
            "Client ID is required".into(),
            "Client Secret is required".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid credentials: Client ID is required, Client Secret is required"
        );
    }
}
