//! Service provisioning error types.

use thiserror::Error;

use crate::control_plane::ControlPlaneError;
use crate::nodes::NodeError;
use crate::remote::RemoteError;
use crate::volume::VolumeError;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the service provisioner.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No record, or no control-plane application behind it.
    #[error("service not found: {0}")]
    NotFound(String),

    /// The session already has a provisioned service.
    #[error("service already exists: {0}")]
    AlreadyExists(String),

    /// Request or configuration cannot be acted on.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No worker node can take a session volume.
    #[error("no capacity: no eligible worker nodes")]
    NoCapacity,

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A creation pipeline step failed. The record has been marked `error`.
    #[error("provisioning step {step} failed: {source}")]
    Pipeline {
        step: &'static str,
        #[source]
        source: Box<ServiceError>,
    },

    /// Teardown removed the application but left the session volume behind.
    #[error("partial cleanup of {session_id}: volume {volume} on {node}: {message}")]
    PartialCleanup {
        session_id: String,
        volume: String,
        node: String,
        message: String,
    },

    /// Service record store failure.
    #[error("service store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<NodeError> for ServiceError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::NoCapacity => ServiceError::NoCapacity,
            NodeError::Remote(e) => ServiceError::Remote(e),
            NodeError::ParseError(message) => ServiceError::Remote(RemoteError::ParseError {
                host: "fleet manager".to_string(),
                message,
            }),
        }
    }
}

impl From<VolumeError> for ServiceError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::Remote(e) => ServiceError::Remote(e),
            VolumeError::InvalidName(message) | VolumeError::InvalidInput(message) => {
                ServiceError::InvalidInput(message)
            }
        }
    }
}

impl ServiceError {
    /// The innermost error, looking through pipeline step wrappers.
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the failing pipeline step, if any.
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            ServiceError::Pipeline { step, .. } => Some(step),
            _ => None,
        }
    }
}
