//! Cloud API error types.

use thiserror::Error;

/// Errors talking to the Avi-on cloud
#[derive(Error, Debug)]
pub enum ApiError {
    /// Account credentials were refused
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A request needing a session token was made before `authenticate`
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code
        status: u16,
        /// Truncated response body
        message: String,
    },

    /// Network-level failure (DNS, TLS, timeout, connection refused)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Requested network is not owned by the account
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Account owns no networks
    #[error("No networks found for this account")]
    NoNetworks,

    /// Host could not be parsed as a URL
    #[error("Invalid API host: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
