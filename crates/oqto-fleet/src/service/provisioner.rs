//! Session service lifecycle: create, start, stop, delete, inspect.

use std::sync::Arc;

use log::{info, warn};

use super::error::{ServiceError, ServiceResult};
use super::models::{ServiceRecord, ServiceStatus, ServiceStatusView, SessionSettings};
use super::pipeline::{Pipeline, PipelineConfig, PipelineStep, ProvisionContext};
use super::repository::ServiceRepository;
use crate::control_plane::{ControlPlaneApi, Deployment};
use crate::nodes::NodeSelector;
use crate::volume::{VolumeManager, session_volume_name, validate_volume_name};

/// Owns the lifecycle of every session's external resources.
#[derive(Clone)]
pub struct ServiceProvisioner {
    repo: ServiceRepository,
    control_plane: Arc<dyn ControlPlaneApi>,
    volumes: Arc<dyn VolumeManager>,
    pipeline: Pipeline,
}

impl ServiceProvisioner {
    pub fn new(
        repo: ServiceRepository,
        control_plane: Arc<dyn ControlPlaneApi>,
        selector: Arc<NodeSelector>,
        volumes: Arc<dyn VolumeManager>,
        config: PipelineConfig,
    ) -> Self {
        let pipeline = Pipeline::new(
            repo.clone(),
            control_plane.clone(),
            selector,
            volumes.clone(),
            config,
        );
        Self {
            repo,
            control_plane,
            volumes,
            pipeline,
        }
    }

    pub fn repository(&self) -> &ServiceRepository {
        &self.repo
    }

    /// Provision a session service.
    ///
    /// A session whose record is `creating` or `error` may be provisioned again;
    /// the new attempt starts from scratch. A running or stopped service has to
    /// be deleted first.
    pub async fn create(
        &self,
        session_id: &str,
        settings: SessionSettings,
    ) -> ServiceResult<ServiceRecord> {
        validate_volume_name(&session_volume_name(session_id))
            .map_err(|_| ServiceError::InvalidInput(format!("invalid session id '{}'", session_id)))?;

        if let Some(existing) = self.repo.get(session_id).await? {
            match existing.status {
                ServiceStatus::Running | ServiceStatus::Stopped => {
                    return Err(ServiceError::AlreadyExists(session_id.to_string()));
                }
                ServiceStatus::Creating | ServiceStatus::Error => {
                    if existing.control_plane_app_id.is_some() {
                        warn!(
                            "Re-provisioning {} over a previous attempt; its resources are left for teardown",
                            session_id
                        );
                    }
                }
            }
        }

        info!("Provisioning session {}", session_id);
        let mut ctx = ProvisionContext::new(session_id, settings);
        self.pipeline.run(&mut ctx, PipelineStep::RecordIntent).await?;

        self.repo
            .get(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(session_id.to_string()))
    }

    /// Record with a control-plane application, or `NotFound`.
    async fn require_app(&self, session_id: &str) -> ServiceResult<(ServiceRecord, String)> {
        let record = self
            .repo
            .get(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(session_id.to_string()))?;
        let app_id = record
            .control_plane_app_id
            .clone()
            .ok_or_else(|| ServiceError::NotFound(session_id.to_string()))?;
        Ok((record, app_id))
    }

    pub async fn start(&self, session_id: &str) -> ServiceResult<()> {
        let (_, app_id) = self.require_app(session_id).await?;
        self.control_plane.start_application(&app_id).await?;
        self.repo
            .update_status(session_id, ServiceStatus::Running)
            .await?;
        info!("Started session {}", session_id);
        Ok(())
    }

    pub async fn stop(&self, session_id: &str) -> ServiceResult<()> {
        let (_, app_id) = self.require_app(session_id).await?;
        self.control_plane.stop_application(&app_id).await?;
        self.repo
            .update_status(session_id, ServiceStatus::Stopped)
            .await?;
        info!("Stopped session {}", session_id);
        Ok(())
    }

    /// Tear down a session's application and volume, then forget it.
    ///
    /// Deleting an unknown session succeeds. If the control plane refuses to
    /// delete the application the record is kept so the delete can be retried.
    /// A volume that cannot be removed is logged and left to the reconciler.
    pub async fn delete(&self, session_id: &str) -> ServiceResult<()> {
        let Some(record) = self.repo.get(session_id).await? else {
            return Ok(());
        };

        if let Some(ref app_id) = record.control_plane_app_id {
            self.control_plane.delete_application(app_id).await?;
        }

        if let Some((volume, node)) = record.volume_placement() {
            if let Err(e) = self.volumes.remove_volume_on_node(volume, node).await {
                let partial = ServiceError::PartialCleanup {
                    session_id: session_id.to_string(),
                    volume: volume.to_string(),
                    node: node.to_string(),
                    message: e.to_string(),
                };
                warn!("{}", partial);
            }
        }

        self.repo.delete(session_id).await?;
        info!("Deleted session {}", session_id);
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> ServiceResult<Option<ServiceRecord>> {
        Ok(self.repo.get(session_id).await?)
    }

    pub async fn get_status(&self, session_id: &str) -> ServiceResult<Option<ServiceStatusView>> {
        Ok(self
            .repo
            .get(session_id)
            .await?
            .map(|record| record.status_view()))
    }

    pub async fn list(&self) -> ServiceResult<Vec<ServiceRecord>> {
        Ok(self.repo.list().await?)
    }

    pub async fn logs(&self, session_id: &str, tail: u32) -> ServiceResult<String> {
        let (_, app_id) = self.require_app(session_id).await?;
        Ok(self.control_plane.fetch_logs(&app_id, tail).await?)
    }

    pub async fn deployment_logs(&self, session_id: &str) -> ServiceResult<Vec<Deployment>> {
        let (_, app_id) = self.require_app(session_id).await?;
        Ok(self.control_plane.fetch_deployment_logs(&app_id).await?)
    }
}
