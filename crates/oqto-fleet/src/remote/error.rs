//! Remote execution error types.

use thiserror::Error;

/// Result type for remote command operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while running commands on fleet hosts.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote-shell client could not be launched at all.
    #[error("failed to reach {host}: {message}")]
    Spawn { host: String, message: String },

    /// The command ran but exited non-zero.
    #[error("`{command}` on {host} exited with {exit_code}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Failed to parse command output.
    #[error("failed to parse output from {host}: {message}")]
    ParseError { host: String, message: String },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
