//! Volume management error types.

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Errors that can occur while managing volumes on fleet hosts.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Volume name failed validation; no command was issued.
    #[error("invalid volume name: {0}")]
    InvalidName(String),

    /// Remote command could not be issued or exited non-zero.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
