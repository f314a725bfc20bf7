//! External orchestration control plane.
//!
//! The control plane owns applications (service instances), their mounts,
//! environment, placement, and ingress. Every operation here is one
//! authenticated HTTP request; nothing is retried.

mod client;
mod error;
mod types;

pub use client::{ControlPlaneClient, ControlPlaneConfig};
pub use error::{ControlPlaneError, ControlPlaneResult};
pub use types::*;

use async_trait::async_trait;

/// Operations the provisioner needs from the control plane.
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    async fn create_application(
        &self,
        request: CreateApplicationRequest,
    ) -> ControlPlaneResult<Application>;

    async fn update_application(&self, request: UpdateApplicationRequest)
    -> ControlPlaneResult<()>;

    async fn save_environment(&self, request: SaveEnvironmentRequest) -> ControlPlaneResult<()>;

    async fn save_build_config(&self, request: BuildConfig) -> ControlPlaneResult<()>;

    async fn save_placement_constraints(&self, request: PlacementRequest)
    -> ControlPlaneResult<()>;

    async fn create_mount(&self, request: CreateMountRequest) -> ControlPlaneResult<Mount>;

    async fn create_domain(&self, request: DomainSpec) -> ControlPlaneResult<Domain>;

    async fn update_domain(&self, request: UpdateDomainRequest) -> ControlPlaneResult<()>;

    async fn deploy_application(&self, application_id: &str) -> ControlPlaneResult<()>;

    async fn stop_application(&self, application_id: &str) -> ControlPlaneResult<()>;

    async fn start_application(&self, application_id: &str) -> ControlPlaneResult<()>;

    async fn delete_application(&self, application_id: &str) -> ControlPlaneResult<()>;

    /// Recent container output, `tail` lines.
    async fn fetch_logs(&self, application_id: &str, tail: u32) -> ControlPlaneResult<String>;

    async fn fetch_deployment_logs(&self, application_id: &str)
    -> ControlPlaneResult<Vec<Deployment>>;
}
