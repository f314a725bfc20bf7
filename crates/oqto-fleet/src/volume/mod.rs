//! Session and editor volumes on fleet hosts.
//!
//! A session volume lives on exactly one host and is named after its session
//! (`session-<id>`), so the name alone is enough to find its owner during
//! reconciliation. The on-disk volume is the source of truth; the service
//! record only caches where it was placed.

mod editor;
mod error;
mod remote;

pub use editor::{EditorConfig, EditorVolume, FanOutReport, NodeProbe};
pub use error::{VolumeError, VolumeResult};
pub use remote::{RemoteVolumeManager, VolumeConfig};

use async_trait::async_trait;
use log::warn;
use serde::Serialize;

/// Prefix shared by every session volume.
pub const SESSION_VOLUME_PREFIX: &str = "session-";

/// Volume name for a session.
pub fn session_volume_name(session_id: &str) -> String {
    format!("{}{}", SESSION_VOLUME_PREFIX, session_id)
}

/// Session ID embedded in a session volume name, if the name follows the convention.
pub fn session_id_from_volume(volume_name: &str) -> Option<&str> {
    volume_name
        .strip_prefix(SESSION_VOLUME_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Validate a volume name before it reaches a shell.
///
/// Accepts `[A-Za-z0-9][A-Za-z0-9_.-]*`, at most 128 characters.
pub fn validate_volume_name(name: &str) -> VolumeResult<()> {
    if name.is_empty() {
        return Err(VolumeError::InvalidName(
            "volume name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(VolumeError::InvalidName(format!(
            "volume name '{}' exceeds maximum length",
            name
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !first_ok || !rest_ok {
        return Err(VolumeError::InvalidName(format!(
            "volume name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

/// Outcome of looking for a volume on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum VolumeProbe {
    Exists,
    NotFound,
    /// The host could not be asked; existence is unknown.
    ProbeFailed(String),
}

impl VolumeProbe {
    pub fn exists(&self) -> bool {
        matches!(self, VolumeProbe::Exists)
    }
}

/// Volume lifecycle on a named host.
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Create `name` on `node`. Creating an existing volume succeeds.
    async fn create_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()>;

    /// Remove `name` from `node`. A volume that is already gone counts as removed.
    async fn remove_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()>;

    /// Check whether `name` exists on `node`.
    async fn probe_volume(&self, name: &str, node: &str) -> VolumeProbe;

    /// Names of every volume on `node`.
    async fn list_volumes(&self, node: &str) -> VolumeResult<Vec<String>>;

    /// Run `script` in a throwaway container of `image` with `name` mounted at `mount_path`.
    async fn run_with_volume(
        &self,
        name: &str,
        node: &str,
        image: &str,
        mount_path: &str,
        script: &str,
    ) -> VolumeResult<()>;

    /// Best-effort removal. Failures are logged and swallowed.
    async fn delete_volume_on_node(&self, name: &str, node: &str) {
        if let Err(e) = self.remove_volume_on_node(name, node).await {
            warn!("Failed to delete volume {} on {}: {}", name, node, e);
        }
    }

    /// Whether `name` exists on `node`. A failed probe reads as absent.
    async fn volume_exists(&self, name: &str, node: &str) -> bool {
        match self.probe_volume(name, node).await {
            VolumeProbe::Exists => true,
            VolumeProbe::NotFound => false,
            VolumeProbe::ProbeFailed(reason) => {
                warn!(
                    "Could not probe volume {} on {}, assuming absent: {}",
                    name, node, reason
                );
                false
            }
        }
    }
}
