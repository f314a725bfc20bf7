//! In-memory fakes for the seam traits, shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::control_plane::*;
use crate::nodes::{NodeAvailability, NodeInventory, NodeResult, WorkerNode};
use crate::remote::RemoteError;
use crate::volume::{VolumeError, VolumeManager, VolumeProbe, VolumeResult};

pub struct StaticInventory {
    nodes: Vec<WorkerNode>,
}

impl StaticInventory {
    pub fn new(hosts: &[&str]) -> Self {
        Self {
            nodes: hosts
                .iter()
                .map(|h| WorkerNode {
                    hostname: h.to_string(),
                    cluster_id: format!("id-{h}"),
                    availability: NodeAvailability::Active,
                })
                .collect(),
        }
    }

    /// Take `host` out of rotation with the given availability.
    pub fn with_availability(mut self, host: &str, availability: NodeAvailability) -> Self {
        for node in self.nodes.iter_mut().filter(|n| n.hostname == host) {
            node.availability = availability.clone();
        }
        self
    }
}

#[async_trait]
impl NodeInventory for StaticInventory {
    async fn storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.availability.is_active())
            .cloned()
            .collect())
    }

    async fn all_storage_nodes(&self) -> NodeResult<Vec<WorkerNode>> {
        Ok(self.nodes.clone())
    }
}

/// What the fake control plane has been told.
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneState {
    pub env: String,
    pub constraints: Vec<String>,
    pub mounts: Vec<CreateMountRequest>,
    pub domains: Vec<DomainSpec>,
    pub auto_deploy: Option<bool>,
    pub deleted: Vec<String>,
}

#[derive(Default)]
pub struct FakeControlPlane {
    calls: Mutex<Vec<&'static str>>,
    fail: Mutex<Option<&'static str>>,
    state: Mutex<ControlPlaneState>,
}

impl FakeControlPlane {
    /// Make every call to `op` fail with a 500.
    pub fn fail_on(&self, op: &'static str) {
        *self.fail.lock().unwrap() = Some(op);
    }

    pub fn clear_failure(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn state(&self) -> ControlPlaneState {
        self.state.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str) -> ControlPlaneResult<()> {
        self.calls.lock().unwrap().push(op);
        if *self.fail.lock().unwrap() == Some(op) {
            return Err(ControlPlaneError::Api {
                endpoint: op.to_string(),
                status: 500,
                body: format!("{op} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneApi for FakeControlPlane {
    async fn create_application(
        &self,
        request: CreateApplicationRequest,
    ) -> ControlPlaneResult<Application> {
        self.record("create_application")?;
        Ok(Application {
            application_id: format!("app-{}", request.name),
            name: request.name,
            app_name: Some(request.app_name),
            application_status: Some("idle".to_string()),
        })
    }

    async fn update_application(
        &self,
        request: UpdateApplicationRequest,
    ) -> ControlPlaneResult<()> {
        self.record("update_application")?;
        self.state.lock().unwrap().auto_deploy = request.auto_deploy;
        Ok(())
    }

    async fn save_environment(&self, request: SaveEnvironmentRequest) -> ControlPlaneResult<()> {
        self.record("save_environment")?;
        self.state.lock().unwrap().env = request.env;
        Ok(())
    }

    async fn save_build_config(&self, _request: BuildConfig) -> ControlPlaneResult<()> {
        self.record("save_build_config")
    }

    async fn save_placement_constraints(
        &self,
        request: PlacementRequest,
    ) -> ControlPlaneResult<()> {
        self.record("save_placement_constraints")?;
        self.state.lock().unwrap().constraints = request.placement_swarm.constraints;
        Ok(())
    }

    async fn create_mount(&self, request: CreateMountRequest) -> ControlPlaneResult<Mount> {
        self.record("create_mount")?;
        let mut state = self.state.lock().unwrap();
        state.mounts.push(request.clone());
        Ok(Mount {
            mount_id: format!("m-{}", state.mounts.len()),
            volume_name: Some(request.volume_name),
            mount_path: Some(request.mount_path),
        })
    }

    async fn create_domain(&self, request: DomainSpec) -> ControlPlaneResult<Domain> {
        self.record("create_domain")?;
        let mut state = self.state.lock().unwrap();
        state.domains.push(request.clone());
        Ok(Domain {
            domain_id: format!("dom-{}", state.domains.len()),
            host: request.host,
            path: Some(request.path),
            https: request.https,
        })
    }

    async fn update_domain(&self, request: UpdateDomainRequest) -> ControlPlaneResult<()> {
        self.record("update_domain")?;
        self.state.lock().unwrap().domains.push(request.spec);
        Ok(())
    }

    async fn deploy_application(&self, _application_id: &str) -> ControlPlaneResult<()> {
        self.record("deploy_application")
    }

    async fn stop_application(&self, _application_id: &str) -> ControlPlaneResult<()> {
        self.record("stop_application")
    }

    async fn start_application(&self, _application_id: &str) -> ControlPlaneResult<()> {
        self.record("start_application")
    }

    async fn delete_application(&self, application_id: &str) -> ControlPlaneResult<()> {
        self.record("delete_application")?;
        self.state
            .lock()
            .unwrap()
            .deleted
            .push(application_id.to_string());
        Ok(())
    }

    async fn fetch_logs(&self, application_id: &str, tail: u32) -> ControlPlaneResult<String> {
        self.record("fetch_logs")?;
        Ok(format!("{application_id}: last {tail} lines"))
    }

    async fn fetch_deployment_logs(
        &self,
        application_id: &str,
    ) -> ControlPlaneResult<Vec<Deployment>> {
        self.record("fetch_deployment_logs")?;
        Ok(vec![Deployment {
            deployment_id: format!("dep-{application_id}"),
            status: Some("done".to_string()),
            title: Some("Manual deployment".to_string()),
            created_at: None,
            log_path: None,
        }])
    }
}

/// Volumes per node, held in memory.
#[derive(Default)]
pub struct FakeVolumes {
    volumes: Mutex<BTreeMap<String, BTreeSet<String>>>,
    created: Mutex<Vec<(String, String)>>,
    removed: Mutex<Vec<(String, String)>>,
    /// `(volume, node)` pairs whose removal fails.
    stuck: Mutex<HashSet<(String, String)>>,
    /// Nodes that cannot be reached at all.
    unreachable: Mutex<HashSet<String>>,
    fail_create: Mutex<bool>,
}

impl FakeVolumes {
    pub fn with_volumes(self, node: &str, names: &[&str]) -> Self {
        self.volumes
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn stuck(self, volume: &str, node: &str) -> Self {
        self.stuck
            .lock()
            .unwrap()
            .insert((volume.to_string(), node.to_string()));
        self
    }

    pub fn unreachable(self, node: &str) -> Self {
        self.unreachable.lock().unwrap().insert(node.to_string());
        self
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    pub fn created(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(String, String)> {
        self.removed.lock().unwrap().clone()
    }

    pub fn volumes_on(&self, node: &str) -> Vec<String> {
        self.volumes
            .lock()
            .unwrap()
            .get(node)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check_reachable(&self, node: &str) -> VolumeResult<()> {
        if self.unreachable.lock().unwrap().contains(node) {
            return Err(VolumeError::Remote(RemoteError::Spawn {
                host: node.to_string(),
                message: "connection timed out".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeManager for FakeVolumes {
    async fn create_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        self.check_reachable(node)?;
        if *self.fail_create.lock().unwrap() {
            return Err(VolumeError::Remote(RemoteError::CommandFailed {
                host: node.to_string(),
                command: "docker volume create".to_string(),
                exit_code: 1,
                stderr: "no space left on device".to_string(),
            }));
        }
        self.volumes
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .insert(name.to_string());
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), node.to_string()));
        Ok(())
    }

    async fn remove_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        self.check_reachable(node)?;
        if self
            .stuck
            .lock()
            .unwrap()
            .contains(&(name.to_string(), node.to_string()))
        {
            return Err(VolumeError::Remote(RemoteError::CommandFailed {
                host: node.to_string(),
                command: format!("docker volume rm {name}"),
                exit_code: 1,
                stderr: "volume is in use".to_string(),
            }));
        }
        if let Some(volumes) = self.volumes.lock().unwrap().get_mut(node) {
            volumes.remove(name);
        }
        self.removed
            .lock()
            .unwrap()
            .push((name.to_string(), node.to_string()));
        Ok(())
    }

    async fn probe_volume(&self, name: &str, node: &str) -> VolumeProbe {
        if let Err(e) = self.check_reachable(node) {
            return VolumeProbe::ProbeFailed(e.to_string());
        }
        if self.volumes_on(node).iter().any(|v| v == name) {
            VolumeProbe::Exists
        } else {
            VolumeProbe::NotFound
        }
    }

    async fn list_volumes(&self, node: &str) -> VolumeResult<Vec<String>> {
        self.check_reachable(node)?;
        Ok(self.volumes_on(node))
    }

    async fn run_with_volume(
        &self,
        _name: &str,
        node: &str,
        _image: &str,
        _mount_path: &str,
        _script: &str,
    ) -> VolumeResult<()> {
        self.check_reachable(node)
    }
}
