//! SSH-backed remote executor.

use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{CommandOutput, RemoteError, RemoteExecutor, RemoteResult, validate_host};

/// SSH client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Path to the ssh binary.
    pub binary: String,
    /// Remote user. When unset the ssh client default (or ~/.ssh/config) applies.
    pub user: Option<String>,
    /// Remote port.
    pub port: Option<u16>,
    /// Private key to authenticate with.
    pub identity_file: Option<String>,
    /// Seconds to wait for the TCP connection before giving up.
    pub connect_timeout_seconds: u64,
    /// Extra `-o` options, e.g. "StrictHostKeyChecking=accept-new".
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            user: None,
            port: None,
            identity_file: None,
            connect_timeout_seconds: 10,
            options: vec!["StrictHostKeyChecking=accept-new".to_string()],
        }
    }
}

/// Runs commands on fleet hosts through the system ssh client.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(SshConfig::default())
    }
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Build the ssh argument vector for running `command` on `host`.
    fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
        ];

        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        if let Some(ref identity) = self.config.identity_file {
            args.push("-i".to_string());
            args.push(shellexpand::tilde(identity).to_string());
        }

        // A user embedded in the host ("deploy@node") wins over the configured one.
        match self.config.user {
            Some(ref user) if !host.contains('@') => args.push(format!("{}@{}", user, host)),
            _ => args.push(host.to_string()),
        }

        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput> {
        validate_host(host)?;

        debug!("ssh {}: {}", host, command);

        let output = Command::new(&self.config.binary)
            .args(self.ssh_args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args_defaults() {
        let executor = SshExecutor::default();
        let args = executor.ssh_args("node-a", "docker volume ls");

        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "BatchMode=yes");
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 3], "node-a");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args[args.len() - 1], "docker volume ls");
    }

    #[test]
    fn test_ssh_args_user_port_identity() {
        let executor = SshExecutor::new(SshConfig {
            user: Some("deploy".to_string()),
            port: Some(2222),
            identity_file: Some("/etc/oqto/fleet_key".to_string()),
            options: Vec::new(),
            ..Default::default()
        });
        let args = executor.ssh_args("node-b", "true");

        let port_idx = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port_idx + 1], "2222");
        let key_idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[key_idx + 1], "/etc/oqto/fleet_key");
        assert!(args.contains(&"deploy@node-b".to_string()));
    }

    #[test]
    fn test_ssh_args_host_with_user_wins() {
        let executor = SshExecutor::new(SshConfig {
            user: Some("deploy".to_string()),
            ..Default::default()
        });
        let args = executor.ssh_args("root@node-c", "true");
        assert!(args.contains(&"root@node-c".to_string()));
        assert!(!args.iter().any(|a| a == "deploy@root@node-c"));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_host() {
        let executor = SshExecutor::default();
        let err = executor.run("-oProxyCommand=x", "true").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_run_reports_spawn_failure() {
        let executor = SshExecutor::new(SshConfig {
            binary: "/nonexistent/oqto-fleet-ssh".to_string(),
            ..Default::default()
        });
        let err = executor.run("node-a", "true").await.unwrap_err();
        assert!(matches!(err, RemoteError::Spawn { .. }));
    }
}
