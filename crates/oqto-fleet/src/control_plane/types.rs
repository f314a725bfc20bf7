//! Control-plane request and response types.
//!
//! Field names follow the control plane's camelCase JSON. Responses ignore
//! fields they do not model.

use serde::{Deserialize, Serialize};

/// Request to create an application (service instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub name: String,
    /// Name used for the container service itself.
    pub app_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreateApplicationRequest {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            app_name: name.clone(),
            name,
            project_id: None,
            server_id: None,
            description: None,
        }
    }

    pub fn project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Application as returned by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub application_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub application_status: Option<String>,
}

/// Body for procedures that only address an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRef {
    pub application_id: String,
}

/// General application metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplicationRequest {
    pub application_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_deploy: Option<bool>,
}

/// Replaces the application's environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEnvironmentRequest {
    pub application_id: String,
    /// Newline-separated `KEY=value` pairs.
    pub env: String,
}

/// Prebuilt runtime image the application runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub application_id: String,
    pub docker_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Swarm placement settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSwarm {
    #[serde(rename = "Constraints")]
    pub constraints: Vec<String>,
}

/// Scheduling constraints for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    pub application_id: String,
    pub placement_swarm: PlacementSwarm,
}

impl PlacementRequest {
    /// Pin the application to a single host.
    pub fn pin_to_host(application_id: impl Into<String>, hostname: &str) -> Self {
        Self {
            application_id: application_id.into(),
            placement_swarm: PlacementSwarm {
                constraints: vec![format!("node.hostname == {}", hostname)],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Volume,
    Bind,
}

/// Attach a volume to an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMountRequest {
    pub service_id: String,
    pub service_type: String,
    #[serde(rename = "type")]
    pub mount_type: MountType,
    pub volume_name: String,
    pub mount_path: String,
    pub read_only: bool,
}

impl CreateMountRequest {
    pub fn volume(
        application_id: impl Into<String>,
        volume_name: impl Into<String>,
        mount_path: impl Into<String>,
        read_only: bool,
    ) -> Self {
        Self {
            service_id: application_id.into(),
            service_type: "application".to_string(),
            mount_type: MountType::Volume,
            volume_name: volume_name.into(),
            mount_path: mount_path.into(),
            read_only,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub mount_id: String,
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub mount_path: Option<String>,
}

/// Ingress routing for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    pub application_id: String,
    pub host: String,
    pub path: String,
    pub port: u16,
    pub https: bool,
    /// TLS certificate source, e.g. "letsencrypt".
    pub certificate_type: String,
    /// Remove `path` before forwarding to the instance.
    pub strip_path: bool,
    pub domain_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDomainRequest {
    pub domain_id: String,
    #[serde(flatten)]
    pub spec: DomainSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub domain_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub https: bool,
}

/// One deployment run of an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub deployment_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
}
