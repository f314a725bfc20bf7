//! Service record models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a session service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// A provisioning attempt is in progress (or was interrupted).
    Creating,
    /// Provisioning completed; the instance is deployed.
    Running,
    /// Explicitly stopped.
    Stopped,
    /// Provisioning failed. Never retried automatically.
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Creating => write!(f, "creating"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "creating" => Ok(ServiceStatus::Creating),
            "running" => Ok(ServiceStatus::Running),
            "stopped" => Ok(ServiceStatus::Stopped),
            "error" => Ok(ServiceStatus::Error),
            _ => Err(format!("unknown service status: {}", s)),
        }
    }
}

impl TryFrom<String> for ServiceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Durable per-session record of what has been provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ServiceRecord {
    pub session_id: String,
    /// Application ID on the control plane, once created.
    pub control_plane_app_id: Option<String>,
    /// Public URL of the session instance.
    pub service_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ServiceStatus,
    pub error_message: Option<String>,
    /// Session volume name. Always set together with `worker_node`.
    pub volume_name: Option<String>,
    /// Host holding the session volume.
    pub worker_node: Option<String>,
    pub editor_mount_id: Option<String>,
    pub session_mount_id: Option<String>,
    /// Whether mounts were attached to the application.
    pub uses_volumes: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ServiceRecord {
    /// Volume placement, when both halves are recorded.
    pub fn volume_placement(&self) -> Option<(&str, &str)> {
        match (&self.volume_name, &self.worker_node) {
            (Some(volume), Some(node)) => Some((volume.as_str(), node.as_str())),
            _ => None,
        }
    }

    pub fn status_view(&self) -> ServiceStatusView {
        ServiceStatusView {
            status: self.status,
            url: self.service_url.clone(),
            error: self.error_message.clone(),
        }
    }
}

/// Externally visible status of a session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusView {
    pub status: ServiceStatus,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// Per-session settings supplied with a creation request. Taken as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Repository to clone into the workspace on first start.
    pub repository_url: Option<String>,
    /// Custom environment variables.
    pub env: BTreeMap<String, String>,
    /// Provider credentials exposed as environment variables.
    pub credential_env: BTreeMap<String, String>,
}
