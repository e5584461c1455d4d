//! Remote command channel to the PgBouncer host
//!
//! Commands run over a multiplexed OpenSSH session: `connect` starts a control
//! master in a private temporary directory and every `exec` reuses its socket,
//! so the pause window is not spent on SSH handshakes.

use crate::config::RemoteConfig;
use crate::error::{Result, SwitchoverError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    /// Create a successful output with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }

    /// Create a failed output
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Convert a non-zero exit code into a `RemoteCommand` error
    pub fn check(self, command: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SwitchoverError::RemoteCommand {
                command: command.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs shell commands on the pooler host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run a command, returning its output whatever the exit code
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Close the session
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Multiplexed OpenSSH session
pub struct SshSession {
    destination: String,
    port: u16,
    identity: Option<PathBuf>,
    connect_timeout_secs: u64,
    control_path: PathBuf,
    // Holds the control socket directory for the session lifetime
    _control_dir: TempDir,
}

impl SshSession {
    /// Open the control master and verify the host is reachable
    pub async fn connect(host: &str, config: &RemoteConfig) -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("switchover-ssh")
            .tempdir()
            .map_err(|e| SwitchoverError::RemoteSession(format!("Failed to create control dir: {}", e)))?;

        let session = Self {
            destination: format!("{}@{}", config.user, host),
            port: config.port,
            identity: config.private_key_path.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            control_path: control_dir.path().join("control.sock"),
            _control_dir: control_dir,
        };

        debug!(destination = %session.destination, port = session.port, "Opening SSH control master");

        let output = session
            .ssh_command()
            .args(["-M", "-f", "-N"])
            .arg(&session.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SwitchoverError::RemoteSession(format!("Failed to spawn ssh: {}", e)))?;

        if !output.status.success() {
            return Err(SwitchoverError::RemoteSession(format!(
                "Could not connect to {}: {}",
                session.destination,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(destination = %session.destination, "SSH session established");
        Ok(session)
    }

    /// Path of the control socket
    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-S")
            .arg(&self.control_path)
            .arg("-p")
            .arg(self.port.to_string());

        if let Some(ref identity) = self.identity {
            cmd.arg("-i").arg(identity);
        }

        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        debug!(destination = %self.destination, command = %command, "Running remote command");

        let output = self
            .ssh_command()
            .arg(&self.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        };

        debug!(command = %command, code = result.code, "Remote command finished");
        Ok(result)
    }

    async fn dispose(&self) -> Result<()> {
        let output = self
            .ssh_command()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            debug!(destination = %self.destination, "SSH session closed");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(destination = %self.destination, error = %stderr, "SSH control master did not exit cleanly");
            Err(SwitchoverError::RemoteSession(stderr))
        }
    }
}
