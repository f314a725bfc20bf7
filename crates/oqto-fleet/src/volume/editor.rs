//! Shared read-only editor volume, replicated on every storage node.
//!
//! Every session instance mounts the same volume read-only, so the volume has
//! to exist on whichever host a session lands on. Setup and update fan out to
//! all storage nodes concurrently; a slow or broken node is reported in the
//! [`FanOutReport`] and never holds back the rest.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{VolumeError, VolumeManager, VolumeProbe, VolumeResult, validate_volume_name};
use crate::nodes::{NodeInventory, NodeResult, for_each_node};
use crate::remote::shell_quote;

/// How the editor volume is named, mounted and populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Volume name on every node.
    pub volume_name: String,
    /// Mount point inside session instances (read-only) and inside the builder.
    pub mount_path: String,
    /// Image used for the throwaway population container. Needs git and the build toolchain.
    pub builder_image: String,
    /// Git repository holding the editor sources.
    pub repository_url: String,
    /// Branch to check out.
    pub branch: String,
    pub install_command: String,
    pub build_command: String,
    /// Drops build-only dependencies after the build.
    pub prune_command: String,
    /// Per-node limit for one setup or update run.
    pub node_timeout_seconds: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            volume_name: "oqto-editor".to_string(),
            mount_path: "/opt/oqto".to_string(),
            builder_image: "node:22-bookworm".to_string(),
            repository_url: String::new(),
            branch: "main".to_string(),
            install_command: "npm ci".to_string(),
            build_command: "npm run build".to_string(),
            prune_command: "npm prune --omit=dev".to_string(),
            node_timeout_seconds: 900,
        }
    }
}

impl EditorConfig {
    /// Shell script that fetches, installs, builds and prunes the editor in place.
    ///
    /// Runs against a fresh or an existing volume: an existing checkout is
    /// fast-forwarded to the branch head, an empty volume is cloned into.
    pub fn population_script(&self) -> String {
        let mount = shell_quote(&self.mount_path);
        let branch = shell_quote(&self.branch);
        let repo = shell_quote(&self.repository_url);

        let mut lines = vec![
            "set -e".to_string(),
            format!("cd {}", mount),
            "if [ -d .git ]; then".to_string(),
            format!("  git fetch --depth 1 origin {}", branch),
            "  git reset --hard FETCH_HEAD".to_string(),
            "  git clean -fdx -e node_modules".to_string(),
            "else".to_string(),
            format!("  git clone --depth 1 --branch {} {} .", branch, repo),
            "fi".to_string(),
        ];
        for step in [&self.install_command, &self.build_command, &self.prune_command] {
            if !step.trim().is_empty() {
                lines.push(step.clone());
            }
        }
        lines.join("\n")
    }
}

/// A node that could not complete a fan-out operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node: String,
    pub reason: String,
}

/// Per-node outcome of a fan-out operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<NodeFailure>,
}

impl FanOutReport {
    /// True when every node succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn from_results(results: Vec<(String, Result<(), String>)>) -> Self {
        let mut report = FanOutReport::default();
        for (node, result) in results {
            match result {
                Ok(()) => report.succeeded.push(node),
                Err(reason) => report.failed.push(NodeFailure { node, reason }),
            }
        }
        report
    }
}

/// Editor volume state on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeProbe {
    pub node: String,
    pub probe: VolumeProbe,
}

/// Manages the shared editor volume across the fleet.
#[derive(Clone)]
pub struct EditorVolume {
    inventory: Arc<dyn NodeInventory>,
    volumes: Arc<dyn VolumeManager>,
    config: EditorConfig,
}

impl EditorVolume {
    pub fn new(
        inventory: Arc<dyn NodeInventory>,
        volumes: Arc<dyn VolumeManager>,
        config: EditorConfig,
    ) -> Self {
        Self {
            inventory,
            volumes,
            config,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Every storage node, in or out of rotation.
    async fn storage_hosts(&self) -> NodeResult<Vec<String>> {
        Ok(self
            .inventory
            .all_storage_nodes()
            .await?
            .into_iter()
            .map(|n| n.hostname)
            .collect())
    }

    fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.config.node_timeout_seconds)
    }

    fn check_config(&self) -> VolumeResult<()> {
        validate_volume_name(&self.config.volume_name)?;
        if self.config.repository_url.trim().is_empty() {
            return Err(VolumeError::InvalidInput(
                "editor.repository_url is not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn populate(&self, node: &str) -> VolumeResult<()> {
        self.volumes
            .run_with_volume(
                &self.config.volume_name,
                node,
                &self.config.builder_image,
                &self.config.mount_path,
                &self.config.population_script(),
            )
            .await
    }

    async fn ensure_populated(&self, node: &str) -> VolumeResult<()> {
        match self.volumes.probe_volume(&self.config.volume_name, node).await {
            VolumeProbe::Exists => {}
            VolumeProbe::NotFound => {
                self.volumes
                    .create_volume_on_node(&self.config.volume_name, node)
                    .await?;
            }
            VolumeProbe::ProbeFailed(reason) => {
                return Err(VolumeError::InvalidInput(format!(
                    "cannot inspect node: {}",
                    reason
                )));
            }
        }
        self.populate(node).await
    }

    /// Create the editor volume where missing and populate it on every storage node.
    pub async fn setup(&self) -> anyhow::Result<FanOutReport> {
        self.check_config()?;
        let hosts = self.storage_hosts().await?;
        info!(
            "Setting up editor volume {} on {} node(s)",
            self.config.volume_name,
            hosts.len()
        );

        let results = for_each_node(hosts, self.node_timeout(), |node| async move {
            self.ensure_populated(&node).await
        })
        .await;

        Ok(self.report("setup", results))
    }

    /// Re-run population against the existing volume on every storage node.
    pub async fn update(&self) -> anyhow::Result<FanOutReport> {
        self.check_config()?;
        let hosts = self.storage_hosts().await?;
        info!(
            "Updating editor volume {} on {} node(s)",
            self.config.volume_name,
            hosts.len()
        );

        let results = for_each_node(hosts, self.node_timeout(), |node| async move {
            match self.volumes.probe_volume(&self.config.volume_name, &node).await {
                VolumeProbe::Exists => self.populate(&node).await,
                VolumeProbe::NotFound => Err(VolumeError::InvalidInput(
                    "editor volume is missing, run setup first".to_string(),
                )),
                VolumeProbe::ProbeFailed(reason) => Err(VolumeError::InvalidInput(format!(
                    "cannot inspect node: {}",
                    reason
                ))),
            }
        })
        .await;

        Ok(self.report("update", results))
    }

    /// Editor volume presence on every storage node.
    pub async fn status(&self) -> anyhow::Result<Vec<NodeProbe>> {
        let hosts = self.storage_hosts().await?;
        let results = for_each_node(hosts, self.node_timeout(), |node| async move {
            Ok::<_, VolumeError>(self.volumes.probe_volume(&self.config.volume_name, &node).await)
        })
        .await;

        Ok(results
            .into_iter()
            .map(|(node, result)| NodeProbe {
                node,
                probe: result.unwrap_or_else(VolumeProbe::ProbeFailed),
            })
            .collect())
    }

    fn report(&self, action: &str, results: Vec<(String, Result<(), String>)>) -> FanOutReport {
        let report = FanOutReport::from_results(results);
        for failure in &report.failed {
            warn!(
                "Editor volume {} failed on {}: {}",
                action, failure.node, failure.reason
            );
        }
        info!(
            "Editor volume {}: {} succeeded, {} failed",
            action,
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }
}
