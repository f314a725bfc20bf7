//! Session service creation pipeline.
//!
//! Provisioning a session touches three external systems (the control plane,
//! a storage host, the record store) with no transaction spanning them. The
//! pipeline runs a fixed sequence of named steps and writes a checkpoint to the
//! service record after every step that creates something remotely, so that a
//! failed attempt always leaves a record pointing at whatever it created.
//!
//! Nothing is rolled back on failure. The record is marked `error` and the
//! error is returned wrapped with the failing step's name. Teardown and the
//! reconciler reclaim what was left behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use super::config::{RoutingConfig, RuntimeConfig, SessionConfig};
use super::error::{ServiceError, ServiceResult};
use super::models::{ServiceRecord, SessionSettings};
use super::repository::ServiceRepository;
use super::token::SessionTokenIssuer;
use crate::control_plane::{
    BuildConfig, ControlPlaneApi, CreateApplicationRequest, CreateMountRequest, DomainSpec,
    PlacementRequest, SaveEnvironmentRequest, UpdateApplicationRequest, UpdateDomainRequest,
};
use crate::nodes::NodeSelector;
use crate::volume::{EditorConfig, VolumeManager, session_volume_name};

/// Named steps of the creation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStep {
    /// Upsert the record at `creating` with every external reference cleared.
    RecordIntent,
    /// Create the control-plane application. Checkpoint: application ID.
    CreateApplication,
    /// Pick a node and create the session volume there. Checkpoint: volume + node.
    PlaceVolume,
    /// Mount the editor volume read-only and the session volume read-write.
    AttachMounts,
    PushEnvironment,
    /// Runtime image plus metadata with auto-deploy off.
    ConfigureBuild,
    /// Constrain the application to the volume's node.
    PinPlacement,
    RouteDomain,
    /// Checkpoint: URL and `running`.
    MarkRunning,
    Deploy,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 10] = [
        PipelineStep::RecordIntent,
        PipelineStep::CreateApplication,
        PipelineStep::PlaceVolume,
        PipelineStep::AttachMounts,
        PipelineStep::PushEnvironment,
        PipelineStep::ConfigureBuild,
        PipelineStep::PinPlacement,
        PipelineStep::RouteDomain,
        PipelineStep::MarkRunning,
        PipelineStep::Deploy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::RecordIntent => "record_intent",
            PipelineStep::CreateApplication => "create_application",
            PipelineStep::PlaceVolume => "place_volume",
            PipelineStep::AttachMounts => "attach_mounts",
            PipelineStep::PushEnvironment => "push_environment",
            PipelineStep::ConfigureBuild => "configure_build",
            PipelineStep::PinPlacement => "pin_placement",
            PipelineStep::RouteDomain => "route_domain",
            PipelineStep::MarkRunning => "mark_running",
            PipelineStep::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the pipeline has learned about one session so far.
///
/// A fresh context starts at [`PipelineStep::RecordIntent`]. A context rebuilt
/// from a record with [`ProvisionContext::from_record`] can resume at a later
/// step without repeating the earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionContext {
    pub session_id: String,
    pub settings: SessionSettings,
    pub app_id: Option<String>,
    pub volume_name: Option<String>,
    pub worker_node: Option<String>,
    pub editor_mount_id: Option<String>,
    pub session_mount_id: Option<String>,
    pub domain_id: Option<String>,
    pub service_url: Option<String>,
}

impl ProvisionContext {
    pub fn new(session_id: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            session_id: session_id.into(),
            settings,
            ..Default::default()
        }
    }

    /// Rebuild a context from the checkpoints stored in a record.
    pub fn from_record(record: &ServiceRecord, settings: SessionSettings) -> Self {
        Self {
            session_id: record.session_id.clone(),
            settings,
            app_id: record.control_plane_app_id.clone(),
            volume_name: record.volume_name.clone(),
            worker_node: record.worker_node.clone(),
            editor_mount_id: record.editor_mount_id.clone(),
            session_mount_id: record.session_mount_id.clone(),
            domain_id: None,
            service_url: record.service_url.clone(),
        }
    }

    fn require<'a>(
        value: &'a Option<String>,
        step: PipelineStep,
        what: &str,
    ) -> ServiceResult<&'a str> {
        value.as_deref().ok_or_else(|| {
            ServiceError::InvalidInput(format!("{} needs {} from an earlier step", step, what))
        })
    }
}

/// Settings the pipeline applies to every session.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub runtime: RuntimeConfig,
    pub routing: RoutingConfig,
    pub session: SessionConfig,
    pub editor: EditorConfig,
    pub project_id: Option<String>,
}

/// Merge environment layers and render them as sorted `KEY=value` lines.
///
/// Later layers win: credentials, then custom variables, then system variables.
pub fn render_environment(
    system: &BTreeMap<String, String>,
    custom: &BTreeMap<String, String>,
    credentials: &BTreeMap<String, String>,
) -> String {
    let mut merged = credentials.clone();
    merged.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));

    for (key, value) in system {
        if merged.contains_key(key) {
            warn!("Ignoring user-supplied value for reserved variable {}", key);
        }
        merged.insert(key.clone(), value.clone());
    }

    merged
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drives [`PipelineStep`]s against the control plane, the fleet and the record store.
#[derive(Clone)]
pub struct Pipeline {
    repo: ServiceRepository,
    control_plane: Arc<dyn ControlPlaneApi>,
    selector: Arc<NodeSelector>,
    volumes: Arc<dyn VolumeManager>,
    tokens: SessionTokenIssuer,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        repo: ServiceRepository,
        control_plane: Arc<dyn ControlPlaneApi>,
        selector: Arc<NodeSelector>,
        volumes: Arc<dyn VolumeManager>,
        config: PipelineConfig,
    ) -> Self {
        let tokens = SessionTokenIssuer::new(
            config.session.token_secret.clone(),
            config.session.token_ttl_days,
        );
        Self {
            repo,
            control_plane,
            selector,
            volumes,
            tokens,
            config,
        }
    }

    /// Run every step from `from` onwards.
    ///
    /// On failure after [`PipelineStep::RecordIntent`] the record is marked
    /// `error` before the error is returned.
    pub async fn run(&self, ctx: &mut ProvisionContext, from: PipelineStep) -> ServiceResult<()> {
        for step in PipelineStep::ALL.into_iter().filter(|s| *s >= from) {
            debug!("[{}] {}", ctx.session_id, step);

            if let Err(source) = self.execute(step, ctx).await {
                let err = ServiceError::Pipeline {
                    step: step.name(),
                    source: Box::new(source),
                };
                warn!("Provisioning {} failed: {}", ctx.session_id, err);

                if step != PipelineStep::RecordIntent {
                    if let Err(e) = self.repo.mark_failed(&ctx.session_id, &err.to_string()).await {
                        warn!(
                            "Failed to record provisioning failure for {}: {:#}",
                            ctx.session_id, e
                        );
                    }
                }
                return Err(err);
            }
        }

        info!(
            "Provisioned session {} on {}",
            ctx.session_id,
            ctx.worker_node.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    async fn execute(&self, step: PipelineStep, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        match step {
            PipelineStep::RecordIntent => self.record_intent(ctx).await,
            PipelineStep::CreateApplication => self.create_application(ctx).await,
            PipelineStep::PlaceVolume => self.place_volume(ctx).await,
            PipelineStep::AttachMounts => self.attach_mounts(ctx).await,
            PipelineStep::PushEnvironment => self.push_environment(ctx).await,
            PipelineStep::ConfigureBuild => self.configure_build(ctx).await,
            PipelineStep::PinPlacement => self.pin_placement(ctx).await,
            PipelineStep::RouteDomain => self.route_domain(ctx).await,
            PipelineStep::MarkRunning => self.mark_running(ctx).await,
            PipelineStep::Deploy => self.deploy(ctx).await,
        }
    }

    async fn record_intent(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        self.repo.begin_attempt(&ctx.session_id).await?;
        ctx.app_id = None;
        ctx.volume_name = None;
        ctx.worker_node = None;
        ctx.editor_mount_id = None;
        ctx.session_mount_id = None;
        ctx.domain_id = None;
        ctx.service_url = None;
        Ok(())
    }

    async fn create_application(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let request = CreateApplicationRequest::new(&ctx.session_id)
            .project(self.config.project_id.clone())
            .description(format!("Oqto session {}", ctx.session_id));
        let app = self.control_plane.create_application(request).await?;

        self.repo
            .set_app_id(&ctx.session_id, &app.application_id)
            .await?;
        ctx.app_id = Some(app.application_id);
        Ok(())
    }

    async fn place_volume(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let node = self.selector.select_node().await?;
        let volume = session_volume_name(&ctx.session_id);
        self.volumes.create_volume_on_node(&volume, &node).await?;

        self.repo
            .set_volume_placement(&ctx.session_id, &volume, &node)
            .await?;
        ctx.volume_name = Some(volume);
        ctx.worker_node = Some(node);
        Ok(())
    }

    async fn attach_mounts(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let step = PipelineStep::AttachMounts;
        let app_id = ProvisionContext::require(&ctx.app_id, step, "an application")?;
        let volume = ProvisionContext::require(&ctx.volume_name, step, "a session volume")?;

        let editor = self
            .control_plane
            .create_mount(CreateMountRequest::volume(
                app_id,
                &self.config.editor.volume_name,
                &self.config.editor.mount_path,
                true,
            ))
            .await?;
        let session = self
            .control_plane
            .create_mount(CreateMountRequest::volume(
                app_id,
                volume,
                &self.config.runtime.workspace_path,
                false,
            ))
            .await?;

        self.repo
            .set_mounts(&ctx.session_id, &editor.mount_id, &session.mount_id)
            .await?;
        ctx.editor_mount_id = Some(editor.mount_id);
        ctx.session_mount_id = Some(session.mount_id);
        Ok(())
    }

    /// Platform-owned variables for a session.
    fn system_environment(&self, ctx: &ProvisionContext) -> ServiceResult<BTreeMap<String, String>> {
        let platform = self.config.session.platform_url.trim_end_matches('/');
        let token = self.tokens.issue(&ctx.session_id)?;

        let mut env = BTreeMap::new();
        env.insert("OQTO_SESSION_ID".to_string(), ctx.session_id.clone());
        env.insert("OQTO_SESSION_TOKEN".to_string(), token);
        env.insert("OQTO_API_URL".to_string(), platform.to_string());
        env.insert(
            "OQTO_EVENTS_URL".to_string(),
            format!("{}/api/sessions/{}/events", platform, ctx.session_id),
        );
        env.insert(
            "OQTO_BASE_PATH".to_string(),
            self.config.routing.session_path(&ctx.session_id),
        );
        env.insert(
            "OQTO_WORKSPACE".to_string(),
            self.config.runtime.workspace_path.clone(),
        );
        if let Some(ref repo) = ctx.settings.repository_url {
            env.insert("OQTO_REPOSITORY_URL".to_string(), repo.clone());
        }
        Ok(env)
    }

    async fn push_environment(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let app_id =
            ProvisionContext::require(&ctx.app_id, PipelineStep::PushEnvironment, "an application")?;

        let system = self.system_environment(ctx)?;
        let env = render_environment(
            &system,
            &ctx.settings.env,
            &ctx.settings.credential_env,
        );

        self.control_plane
            .save_environment(SaveEnvironmentRequest {
                application_id: app_id.to_string(),
                env,
            })
            .await?;
        Ok(())
    }

    async fn configure_build(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let app_id =
            ProvisionContext::require(&ctx.app_id, PipelineStep::ConfigureBuild, "an application")?;
        let runtime = &self.config.runtime;

        self.control_plane
            .save_build_config(BuildConfig {
                application_id: app_id.to_string(),
                docker_image: runtime.image.clone(),
                registry_url: runtime.registry_url.clone(),
                username: runtime.registry_username.clone(),
                password: runtime.registry_password.clone(),
            })
            .await?;

        self.control_plane
            .update_application(UpdateApplicationRequest {
                application_id: app_id.to_string(),
                title: Some(ctx.session_id.clone()),
                description: Some(format!("Oqto session {}", ctx.session_id)),
                auto_deploy: Some(false),
            })
            .await?;
        Ok(())
    }

    async fn pin_placement(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let step = PipelineStep::PinPlacement;
        let app_id = ProvisionContext::require(&ctx.app_id, step, "an application")?;
        let node = ProvisionContext::require(&ctx.worker_node, step, "a worker node")?;

        self.control_plane
            .save_placement_constraints(PlacementRequest::pin_to_host(app_id, node))
            .await?;
        Ok(())
    }

    async fn route_domain(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let app_id =
            ProvisionContext::require(&ctx.app_id, PipelineStep::RouteDomain, "an application")?;
        let routing = &self.config.routing;
        if routing.host.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "routing.host is not configured".to_string(),
            ));
        }

        let spec = DomainSpec {
            application_id: app_id.to_string(),
            host: routing.host.clone(),
            path: routing.session_path(&ctx.session_id),
            port: self.config.runtime.port,
            https: routing.https,
            certificate_type: routing.certificate_type.clone(),
            strip_path: true,
            domain_type: "application".to_string(),
        };

        // A retried attempt that already routed the session updates the existing domain.
        match ctx.domain_id.clone() {
            Some(domain_id) => {
                self.control_plane
                    .update_domain(UpdateDomainRequest { domain_id, spec })
                    .await?;
            }
            None => {
                let domain = self.control_plane.create_domain(spec).await?;
                ctx.domain_id = Some(domain.domain_id);
            }
        }

        ctx.service_url = Some(routing.session_url(&ctx.session_id));
        Ok(())
    }

    async fn mark_running(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let url = ProvisionContext::require(&ctx.service_url, PipelineStep::MarkRunning, "a URL")?;
        self.repo.mark_running(&ctx.session_id, url).await?;
        Ok(())
    }

    async fn deploy(&self, ctx: &mut ProvisionContext) -> ServiceResult<()> {
        let app_id = ProvisionContext::require(&ctx.app_id, PipelineStep::Deploy, "an application")?;
        self.control_plane.deploy_application(app_id).await?;
        Ok(())
    }
}
