//! Config deployment with backup and diff

use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use tracing::{info, instrument, warn};

use svcmgr_core::{remote::shell_quote, Error, Host, RemoteExec, Result};

use crate::config::load_config;

/// Diff lines kept in a [`DeployReport`]
pub const MAX_DIFF_LINES: usize = 20;

/// What a deployment did on the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployReport {
    pub host: String,
    pub target_path: String,
    /// Set when the previous file was copied aside
    pub backup_path: Option<String>,
    /// Head of `diff -u` between the old and new file
    pub diff: Vec<String>,
    pub diff_truncated: bool,
}

fn staged_path(target: &str) -> String {
    format!("{}.new", target)
}

fn backup_path(target: &str) -> String {
    format!("{}.bak", target)
}

pub(crate) fn backup_command(target: &str) -> String {
    format!(
        "cp -p {} {}",
        shell_quote(target),
        shell_quote(&backup_path(target))
    )
}

// diff exits 1 when files differ and 2 when the target is missing
pub(crate) fn diff_command(target: &str) -> String {
    format!(
        "diff -u {} {} || true",
        shell_quote(target),
        shell_quote(&staged_path(target))
    )
}

pub(crate) fn install_command(target: &str) -> String {
    format!(
        "mv -f {} {}",
        shell_quote(&staged_path(target)),
        shell_quote(target)
    )
}

/// Serialize with four-space indentation
fn to_pretty_json(config: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    config.serialize(&mut ser)?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(|e| Error::Other(e.to_string()))
}

/// Deploy `config` to `target_path` on `host`
///
/// The existing file is copied to `<target>.bak` first. The new file is
/// staged as `<target>.new`, diffed against the old one, then moved into
/// place. Backup and diff are best-effort; upload and install failures
/// are errors.
#[instrument(skip(exec, config), fields(host = %host.host))]
pub async fn deploy_config(
    exec: &dyn RemoteExec,
    config: &Value,
    host: &Host,
    target_path: &str,
) -> Result<DeployReport> {
    let target_path = target_path.trim();
    if target_path.is_empty() {
        return Err(Error::Validation("target path must not be empty".into()));
    }

    let mut local = tempfile::NamedTempFile::new()?;
    local.write_all(to_pretty_json(config)?.as_bytes())?;
    local.flush()?;

    let backup = match exec.execute(host, &backup_command(target_path), false).await {
        Ok(_) => {
            info!(backup = %backup_path(target_path), "Backed up existing config");
            Some(backup_path(target_path))
        }
        Err(e) => {
            warn!(error = %e, "No previous config backed up");
            None
        }
    };

    let staged = staged_path(target_path);
    exec.upload(host, local.path(), &staged).await?;

    let (diff, diff_truncated) = match exec.execute(host, &diff_command(target_path), false).await {
        Ok(output) => {
            let lines: Vec<String> = output.lines().map(str::to_string).collect();
            let truncated = lines.len() > MAX_DIFF_LINES;
            (lines.into_iter().take(MAX_DIFF_LINES).collect(), truncated)
        }
        Err(e) => {
            warn!(error = %e, "Could not diff configs");
            (Vec::new(), false)
        }
    };

    exec.execute(host, &install_command(target_path), false).await?;

    info!(target = %target_path, "Config deployed");
    Ok(DeployReport {
        host: host.host.clone(),
        target_path: target_path.to_string(),
        backup_path: backup,
        diff,
        diff_truncated,
    })
}

/// Download the JSON config at `remote_path` on `host`
#[instrument(skip(exec), fields(host = %host.host))]
pub async fn fetch_config(
    exec: &dyn RemoteExec,
    host: &Host,
    remote_path: &str,
) -> Result<Value> {
    let remote_path = remote_path.trim();
    if remote_path.is_empty() {
        return Err(Error::Validation("remote path must not be empty".into()));
    }

    let dir = tempfile::tempdir()?;
    let local = dir.path().join("config.json");
    exec.download(host, remote_path, &local).await?;

    let config = load_config(&local)?;
    info!(path = %remote_path, "Config fetched");
    Ok(config)
}
