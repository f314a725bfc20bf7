//! Session service provisioning.
//!
//! Each session gets one service record, one control-plane application, and
//! one volume pinned to a worker node. [`ServiceProvisioner`] creates these
//! through the [`Pipeline`] and tears them down again.

mod config;
mod error;
mod models;
mod pipeline;
mod provisioner;
mod repository;
mod token;

pub use config::{RoutingConfig, RuntimeConfig, SessionConfig};
pub use error::{ServiceError, ServiceResult};
pub use models::{ServiceRecord, ServiceStatus, ServiceStatusView, SessionSettings};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStep, ProvisionContext, render_environment};
pub use provisioner::ServiceProvisioner;
pub use repository::ServiceRepository;
pub use token::{SessionClaims, SessionTokenIssuer};
