//! Remote execution via SSH

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::{Error, Host, Result};

/// Run commands and move files on one host
///
/// Every failure is reported as [`Error::RemoteExecution`] naming the host.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Execute `command` and return its trimmed stdout
    ///
    /// `elevated` runs the command through non-interactive sudo.
    async fn execute(&self, host: &Host, command: &str, elevated: bool) -> Result<String>;

    /// Copy a local file to `remote_path`, creating the remote directory
    async fn upload(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Copy `remote_path` to a local file, creating the local directory
    async fn download(&self, host: &Host, remote_path: &str, local_path: &Path) -> Result<()>;
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a command for non-interactive sudo
///
/// `-n` makes sudo fail immediately instead of waiting on a password prompt.
pub fn elevate(command: &str) -> String {
    format!("sudo -n sh -c {}", shell_quote(command))
}

/// [`RemoteExec`] backed by the system `ssh` and `scp` clients
///
/// Authentication is left to the ssh client: the host's key file when it
/// exists, otherwise the agent and default identities.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    connect_timeout: Option<u64>,
}

impl SshExecutor {
    /// Create a new executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound connection establishment (not command runtime) to `secs`
    pub fn with_connect_timeout(mut self, secs: Option<u64>) -> Self {
        self.connect_timeout = secs;
        self
    }

    /// Options shared by ssh and scp
    fn common_args(&self, host: &Host, cmd: &mut Command) {
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");

        if let Some(secs) = self.connect_timeout {
            cmd.arg("-o").arg(format!("ConnectTimeout={}", secs));
        }

        if let Some(key_path) = host.key_path() {
            cmd.arg("-i").arg(key_path);
        }
    }

    fn ssh_command(&self, host: &Host, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        self.common_args(host, &mut cmd);
        cmd.arg("-l")
            .arg(&host.user)
            .arg(&host.host)
            .arg(remote_command);
        cmd
    }

    fn scp_command(&self, host: &Host, from: &str, to: &str) -> Command {
        let mut cmd = Command::new("scp");
        self.common_args(host, &mut cmd);
        cmd.arg(from).arg(to);
        cmd
    }

    fn download_command(&self, host: &Host, remote_path: &str, local_path: &Path) -> Command {
        let source = format!("{}:{}", host.destination(), remote_path);
        self.scp_command(host, &source, &local_path.to_string_lossy())
    }

    /// Run a prepared client command, mapping any failure onto the host
    async fn run(&self, host: &Host, mut cmd: Command) -> Result<String> {
        let output = cmd
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::remote(&host.host, format!("Failed to spawn ssh client: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::remote(
                &host.host,
                format!("Command failed ({}): {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RemoteExec for SshExecutor {
    #[instrument(skip(self), fields(host = %host.host))]
    async fn execute(&self, host: &Host, command: &str, elevated: bool) -> Result<String> {
        let remote_command = if elevated {
            elevate(command)
        } else {
            command.to_string()
        };

        debug!(command = %remote_command, "Executing remotely via SSH");
        self.run(host, self.ssh_command(host, &remote_command)).await
    }

    #[instrument(skip(self), fields(host = %host.host))]
    async fn upload(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()> {
        if let Some(dir) = Path::new(remote_path).parent() {
            let dir = dir.to_string_lossy();
            if !dir.is_empty() {
                self.execute(host, &format!("mkdir -p {}", shell_quote(&dir)), false)
                    .await?;
            }
        }

        debug!(local = %local_path.display(), remote = %remote_path, "Uploading file");
        let target = format!("{}:{}", host.destination(), remote_path);
        self.run(
            host,
            self.scp_command(host, &local_path.to_string_lossy(), &target),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(host = %host.host))]
    async fn download(&self, host: &Host, remote_path: &str, local_path: &Path) -> Result<()> {
        if let Some(dir) = local_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        debug!(remote = %remote_path, local = %local_path.display(), "Downloading file");
        self.run(host, self.download_command(host, remote_path, local_path))
            .await?;
        Ok(())
    }
}
