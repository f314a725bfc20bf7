//! Test utilities and common setup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;

use oqto_fleet::api;
use oqto_fleet::control_plane::*;
use oqto_fleet::db::Database;
use oqto_fleet::nodes::{NodeAvailability, NodeInventory, NodeResult, NodeSelector, WorkerNode};
use oqto_fleet::reconcile::{ReconcileConfig, Reconciler};
use oqto_fleet::service::{PipelineConfig, ServiceProvisioner, ServiceRepository};
use oqto_fleet::volume::{EditorConfig, EditorVolume, VolumeManager, VolumeProbe, VolumeResult};

/// Fixed set of storage nodes.
pub struct Nodes(pub Vec<String>);

#[async_trait]
impl NodeInventory for Nodes {
    async fn storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        Ok(self
            .0
            .iter()
            .map(|h| WorkerNode {
                hostname: h.clone(),
                cluster_id: format!("id-{h}"),
                availability: NodeAvailability::Active,
            })
            .collect())
    }
}

/// Volumes per node, held in memory.
#[derive(Default)]
pub struct MemoryVolumes {
    volumes: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl MemoryVolumes {
    pub fn add(&self, node: &str, name: &str) {
        self.volumes
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .insert(name.to_string());
    }

    pub fn on(&self, node: &str) -> Vec<String> {
        self.volumes
            .lock()
            .unwrap()
            .get(node)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VolumeManager for MemoryVolumes {
    async fn create_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        self.add(node, name);
        Ok(())
    }

    async fn remove_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        if let Some(volumes) = self.volumes.lock().unwrap().get_mut(node) {
            volumes.remove(name);
        }
        Ok(())
    }

    async fn probe_volume(&self, name: &str, node: &str) -> VolumeProbe {
        if self.on(node).iter().any(|v| v == name) {
            VolumeProbe::Exists
        } else {
            VolumeProbe::NotFound
        }
    }

    async fn list_volumes(&self, node: &str) -> VolumeResult<Vec<String>> {
        Ok(self.on(node))
    }

    async fn run_with_volume(
        &self,
        _name: &str,
        _node: &str,
        _image: &str,
        _mount_path: &str,
        _script: &str,
    ) -> VolumeResult<()> {
        Ok(())
    }
}

/// Control plane that accepts everything. `reject_deploy` makes deploys fail.
#[derive(Default)]
pub struct AcceptingControlPlane {
    pub reject_deploy: bool,
    deleted: Mutex<Vec<String>>,
}

impl AcceptingControlPlane {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlaneApi for AcceptingControlPlane {
    async fn create_application(
        &self,
        request: CreateApplicationRequest,
    ) -> ControlPlaneResult<Application> {
        Ok(Application {
            application_id: format!("app-{}", request.name),
            name: request.name,
            app_name: None,
            application_status: None,
        })
    }

    async fn update_application(&self, _request: UpdateApplicationRequest) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn save_environment(&self, _request: SaveEnvironmentRequest) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn save_build_config(&self, _request: BuildConfig) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn save_placement_constraints(&self, _request: PlacementRequest) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn create_mount(&self, request: CreateMountRequest) -> ControlPlaneResult<Mount> {
        Ok(Mount {
            mount_id: format!("m-{}", request.volume_name),
            volume_name: Some(request.volume_name),
            mount_path: Some(request.mount_path),
        })
    }

    async fn create_domain(&self, request: DomainSpec) -> ControlPlaneResult<Domain> {
        Ok(Domain {
            domain_id: "dom-1".to_string(),
            host: request.host,
            path: Some(request.path),
            https: request.https,
        })
    }

    async fn update_domain(&self, _request: UpdateDomainRequest) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn deploy_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        if self.reject_deploy {
            return Err(ControlPlaneError::Api {
                endpoint: "application.deploy".to_string(),
                status: 500,
                body: format!("cannot deploy {application_id}"),
            });
        }
        Ok(())
    }

    async fn stop_application(&self, _application_id: &str) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn start_application(&self, _application_id: &str) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn delete_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.deleted
            .lock()
            .unwrap()
            .push(application_id.to_string());
        Ok(())
    }

    async fn fetch_logs(&self, application_id: &str, tail: u32) -> ControlPlaneResult<String> {
        Ok(format!("{application_id}: {tail} lines"))
    }

    async fn fetch_deployment_logs(&self, _application_id: &str) -> ControlPlaneResult<Vec<Deployment>> {
        Ok(Vec::new())
    }
}

/// Options for building a test application.
#[derive(Default)]
pub struct TestOptions {
    pub nodes: Vec<&'static str>,
    pub api_token: Option<&'static str>,
    pub reject_deploy: bool,
    pub editor_repository: Option<&'static str>,
}

/// Router plus handles on its collaborators.
pub struct TestApp {
    pub router: Router,
    pub volumes: Arc<MemoryVolumes>,
    pub control_plane: Arc<AcceptingControlPlane>,
    pub repo: ServiceRepository,
}

/// Build an application over in-memory fakes.
pub async fn build_app(options: TestOptions) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let repo = ServiceRepository::new(db.pool().clone());

    let nodes = if options.nodes.is_empty() {
        vec!["node-a", "node-b"]
    } else {
        options.nodes
    };
    let inventory = Arc::new(Nodes(nodes.iter().map(|n| n.to_string()).collect()));
    let volumes = Arc::new(MemoryVolumes::default());
    let control_plane = Arc::new(AcceptingControlPlane {
        reject_deploy: options.reject_deploy,
        ..Default::default()
    });
    let selector = Arc::new(NodeSelector::new(inventory.clone()));

    let editor_config = EditorConfig {
        repository_url: options.editor_repository.unwrap_or_default().to_string(),
        ..Default::default()
    };
    let pipeline = PipelineConfig {
        editor: editor_config.clone(),
        ..Default::default()
    };

    let provisioner = ServiceProvisioner::new(
        repo.clone(),
        control_plane.clone(),
        selector.clone(),
        volumes.clone(),
        pipeline,
    );
    let reconciler = Reconciler::new(
        inventory.clone(),
        volumes.clone(),
        &ReconcileConfig::default(),
    );
    let editor = EditorVolume::new(inventory, volumes.clone(), editor_config);

    let state = api::AppState::new(
        provisioner,
        selector,
        reconciler,
        editor,
        options.api_token.map(str::to_string),
    );

    TestApp {
        router: api::create_router(state),
        volumes,
        control_plane,
        repo,
    }
}

/// Create a test application with two nodes and no API token.
pub async fn test_app() -> Router {
    build_app(TestOptions::default()).await.router
}
