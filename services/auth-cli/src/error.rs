//! Command-line errors

use thiserror::Error;

/// Inputs a command needs that neither the arguments nor the config
/// supplied. Failures of the auth operations keep their own error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no client ID: pass one to set-credentials or set credentials.client_id")]
    MissingClientId,

    #[error("no client secret: set OAUTH_CLIENT_SECRET or credentials.client_secret_file")]
    MissingClientSecret,
}
