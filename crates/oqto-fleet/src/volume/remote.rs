//! Volume manager that drives the container CLI on each host.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{VolumeError, VolumeManager, VolumeProbe, VolumeResult, validate_volume_name};
use crate::remote::{RemoteError, RemoteExecutor, shell_quote};

/// Volume settings shared by every host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Container CLI binary on the hosts.
    pub cli: String,
    /// Volume driver passed to `volume create`. Host default when unset.
    pub driver: Option<String>,
    /// Label stamped on every volume this service creates.
    pub label: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            cli: "docker".to_string(),
            driver: None,
            label: "oqto.managed=true".to_string(),
        }
    }
}

/// [`VolumeManager`] over a [`RemoteExecutor`].
#[derive(Clone)]
pub struct RemoteVolumeManager {
    executor: Arc<dyn RemoteExecutor>,
    config: VolumeConfig,
}

/// Whether CLI error output means the volume does not exist.
fn is_missing_volume(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such volume")
}

/// Reject image references and paths that could be read as CLI flags or break quoting.
fn validate_arg(kind: &str, value: &str) -> VolumeResult<()> {
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace) {
        return Err(VolumeError::InvalidInput(format!(
            "{} '{}' is not valid",
            kind, value
        )));
    }
    Ok(())
}

impl RemoteVolumeManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: VolumeConfig) -> Self {
        Self { executor, config }
    }

    /// Run a command on `node` and fail on non-zero exit.
    async fn exec(&self, node: &str, command: &str) -> VolumeResult<String> {
        let output = self.executor.run(node, command).await?;
        Ok(output.into_result(node, command)?)
    }
}

#[async_trait]
impl VolumeManager for RemoteVolumeManager {
    async fn create_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        validate_volume_name(name)?;

        let mut command = format!(
            "{} volume create --label {}",
            self.config.cli,
            shell_quote(&self.config.label)
        );
        if let Some(ref driver) = self.config.driver {
            command.push_str(" --driver ");
            command.push_str(&shell_quote(driver));
        }
        command.push(' ');
        command.push_str(name);

        self.exec(node, &command).await?;
        info!("Created volume {} on {}", name, node);
        Ok(())
    }

    async fn remove_volume_on_node(&self, name: &str, node: &str) -> VolumeResult<()> {
        validate_volume_name(name)?;

        let command = format!("{} volume rm {}", self.config.cli, name);
        match self.exec(node, &command).await {
            Ok(_) => {
                info!("Removed volume {} from {}", name, node);
                Ok(())
            }
            Err(VolumeError::Remote(RemoteError::CommandFailed { ref stderr, .. }))
                if is_missing_volume(stderr) =>
            {
                debug!("Volume {} already absent on {}", name, node);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn probe_volume(&self, name: &str, node: &str) -> VolumeProbe {
        if let Err(e) = validate_volume_name(name) {
            return VolumeProbe::ProbeFailed(e.to_string());
        }

        let command = format!(
            "{} volume inspect --format '{{{{.Name}}}}' {}",
            self.config.cli, name
        );
        match self.executor.run(node, &command).await {
            Ok(output) if output.success() => VolumeProbe::Exists,
            Ok(output) if is_missing_volume(&output.stderr) || is_missing_volume(&output.stdout) => {
                VolumeProbe::NotFound
            }
            Ok(output) => match output.into_result(node, &command) {
                Err(e) => VolumeProbe::ProbeFailed(e.to_string()),
                Ok(_) => VolumeProbe::Exists,
            },
            Err(e) => VolumeProbe::ProbeFailed(e.to_string()),
        }
    }

    async fn list_volumes(&self, node: &str) -> VolumeResult<Vec<String>> {
        let command = format!("{} volume ls --format '{{{{.Name}}}}'", self.config.cli);
        let stdout = self.exec(node, &command).await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn run_with_volume(
        &self,
        name: &str,
        node: &str,
        image: &str,
        mount_path: &str,
        script: &str,
    ) -> VolumeResult<()> {
        validate_volume_name(name)?;
        validate_arg("image", image)?;
        validate_arg("mount path", mount_path)?;
        if !mount_path.starts_with('/') {
            return Err(VolumeError::InvalidInput(format!(
                "mount path '{}' must be absolute",
                mount_path
            )));
        }

        let command = format!(
            "{} run --rm -v {} {} sh -c {}",
            self.config.cli,
            shell_quote(&format!("{}:{}", name, mount_path)),
            shell_quote(image),
            shell_quote(script)
        );
        self.exec(node, &command).await?;
        debug!("Ran population script against {} on {}", name, node);
        Ok(())
    }
}
