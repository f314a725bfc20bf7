//! Node inventory and selection error types.

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur while listing or choosing worker nodes.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Neither storage-labelled nor plain worker nodes are available.
    #[error("no capacity: no eligible worker nodes in the fleet")]
    NoCapacity,

    /// The fleet manager could not be queried.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Fleet manager output could not be parsed.
    #[error("failed to parse node listing: {0}")]
    ParseError(String),
}
