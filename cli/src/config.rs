//! Runtime settings resolved from flags and environment

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use svcmgr_core::{
    hosts_path, load_hosts, select_host, Fleet, Host, NotificationManager, ParallelDispatcher,
    Result, SshExecutor,
};

/// Output rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub max_workers: usize,
    /// ssh ConnectTimeout in seconds
    pub connect_timeout: Option<u64>,
    pub output: OutputFormat,
}

impl Settings {
    pub fn templates_dir(&self) -> PathBuf {
        self.config_dir.join("templates")
    }

    /// Hosts for an environment
    pub fn hosts(&self, env: &str) -> Result<Vec<Host>> {
        let path = hosts_path(&self.config_dir, env);
        debug!(path = %path.display(), "Loading host inventory");
        load_hosts(&path)
    }

    /// Every host with `all`, otherwise the one at `index`
    pub fn targets(&self, env: &str, index: usize, all: bool) -> Result<Vec<Host>> {
        let hosts = self.hosts(env)?;
        if all {
            Ok(hosts)
        } else {
            Ok(vec![select_host(&hosts, index)?.clone()])
        }
    }

    pub fn executor(&self) -> SshExecutor {
        SshExecutor::new().with_connect_timeout(self.connect_timeout)
    }

    /// Fleet over ssh, alerting to the console and any configured push backend
    pub fn fleet(&self) -> Fleet {
        let sink = NotificationManager::from_env(reqwest::Client::new());
        Fleet::new(
            Arc::new(self.executor()),
            ParallelDispatcher::new(self.max_workers),
            Arc::new(sink),
        )
    }
}

pub const SUDO_HINT: &str = "\
Passwordless sudo is not configured. Service actions run `sudo -n systemctl` on
each host; allow it there with:
  echo \"$(whoami) ALL=(ALL) NOPASSWD: /bin/systemctl\" | sudo tee /etc/sudoers.d/$(whoami)-systemctl
  sudo chmod 440 /etc/sudoers.d/$(whoami)-systemctl";

/// Whether sudo's stderr says it wanted a password
pub fn needs_password(stderr: &str) -> bool {
    stderr.to_lowercase().contains("password")
}

/// Probe local passwordless sudo and print a setup hint if it would prompt
///
/// Best-effort: a missing sudo binary or a slow probe prints nothing.
pub async fn check_sudo_setup() {
    let probe = Command::new("sudo")
        .args(["-n", "true"])
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_secs(2), probe).await {
        Ok(Ok(output)) if !output.status.success() => {
            if needs_password(&String::from_utf8_lossy(&output.stderr)) {
                eprintln!("{}", SUDO_HINT);
            }
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!(error = %e, "sudo probe could not run"),
        Err(_) => debug!("sudo probe timed out"),
    }
}
