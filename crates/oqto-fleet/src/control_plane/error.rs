//! Control-plane client error types.

use thiserror::Error;

/// Result type for control-plane operations.
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// HTTP request could not be sent or its body not read.
    #[error("control plane request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The control plane answered with a non-2xx status. `body` is kept verbatim.
    #[error("control plane {endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Failed to parse response.
    #[error("failed to parse {endpoint} response: {message}")]
    ParseError { endpoint: String, message: String },

    /// Client is misconfigured.
    #[error("control plane configuration error: {0}")]
    Config(String),
}
