//! Remote command execution on fleet hosts.
//!
//! Volume and inventory operations are plain shell commands issued on a named
//! host. The transport sits behind [`RemoteExecutor`] so that the SSH client
//! used in production can be swapped for another backend (or a fake in tests).
//! Executors never retry and never impose a timeout; that is the caller's call.

mod error;
mod ssh;

pub use error::{RemoteError, RemoteResult};
pub use ssh::{SshConfig, SshExecutor};

use async_trait::async_trait;
use serde::Serialize;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`RemoteError::CommandFailed`], returning stdout otherwise.
    pub fn into_result(self, host: &str, command: &str) -> RemoteResult<String> {
        if self.success() {
            return Ok(self.stdout);
        }

        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };

        Err(RemoteError::CommandFailed {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: self.exit_code,
            stderr,
        })
    }
}

/// Runs shell commands on a named host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` and capture its output.
    ///
    /// A non-zero exit status is reported through [`CommandOutput::exit_code`],
    /// not as an error. Errors mean the command could not be issued at all.
    async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput>;
}

/// Validate a hostname before it is handed to the remote-shell client.
///
/// Rejects anything that could be parsed as a client option.
pub fn validate_host(host: &str) -> RemoteResult<()> {
    if host.is_empty() {
        return Err(RemoteError::InvalidInput(
            "host cannot be empty".to_string(),
        ));
    }

    if host.len() > 253 {
        return Err(RemoteError::InvalidInput(
            "host exceeds maximum length".to_string(),
        ));
    }

    if host.starts_with('-') {
        return Err(RemoteError::InvalidInput(format!(
            "host '{}' must not start with '-'",
            host
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@');
    if !host.chars().all(valid_chars) {
        return Err(RemoteError::InvalidInput(format!(
            "host '{}' contains invalid characters",
            host
        )));
    }

    Ok(())
}

/// Quote a value for a POSIX shell.
///
/// Values made only of characters that are safe unquoted are returned as-is.
pub fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',');
    if !value.is_empty() && value.chars().all(safe) {
        return value.to_string();
    }

    format!("'{}'", value.replace('\'', r"'\''"))
}
