//! Host inventory files
//!
//! Inventories live at `<config-dir>/<env>/hosts.yml`:
//!
//! ```yaml
//! hosts:
//!   - host: 10.0.1.10
//!     user: deploy
//!     key_filename: ~/.ssh/prod.pem
//!   - host: 10.0.1.11
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Error, Host, Result};

pub const HOSTS_FILE: &str = "hosts.yml";

#[derive(Debug, Deserialize)]
struct Inventory {
    #[serde(default)]
    hosts: Vec<Host>,
}

/// Inventory path for an environment
pub fn hosts_path(config_dir: &Path, env: &str) -> PathBuf {
    config_dir.join(env).join(HOSTS_FILE)
}

/// Load and validate the host list from an inventory file
pub fn load_hosts(path: &Path) -> Result<Vec<Host>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read host inventory {}: {}", path.display(), e))
    })?;

    let inventory: Inventory = serde_yaml::from_str(&content).map_err(|e| {
        Error::Validation(format!("Invalid host inventory {}: {}", path.display(), e))
    })?;

    validate_hosts(&inventory.hosts)?;
    debug!(path = %path.display(), hosts = inventory.hosts.len(), "Loaded host inventory");
    Ok(inventory.hosts)
}

/// Reject host lists that must not reach dispatch
pub fn validate_hosts(hosts: &[Host]) -> Result<()> {
    if hosts.is_empty() {
        return Err(Error::Validation("host list is empty".into()));
    }

    for (index, host) in hosts.iter().enumerate() {
        let name = host.host.trim();
        if name.is_empty() {
            return Err(Error::Validation(format!(
                "host entry {} has an empty 'host' field",
                index
            )));
        }
        // ssh would parse a leading dash as an option
        if name.starts_with('-') {
            return Err(Error::Validation(format!(
                "host entry {} has an invalid address '{}'",
                index, name
            )));
        }
    }

    Ok(())
}

/// Host at `index`, or a validation error naming the valid range
pub fn select_host(hosts: &[Host], index: usize) -> Result<&Host> {
    hosts.get(index).ok_or_else(|| {
        Error::Validation(format!(
            "host index {} out of range (0-{})",
            index,
            hosts.len().saturating_sub(1)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_inventory(dir: &TempDir, env: &str, content: &str) -> PathBuf {
        let path = hosts_path(dir.path(), env);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_hosts() {
        let dir = TempDir::new().unwrap();
        let path = write_inventory(
            &dir,
            "prod",
            "hosts:\n  - host: 10.0.1.10\n    user: deploy\n    key_filename: ~/.ssh/prod.pem\n  - host: 10.0.1.11\n",
        );

        let hosts = load_hosts(&path).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].user, "deploy");
        assert_eq!(hosts[0].key_filename.as_deref(), Some("~/.ssh/prod.pem"));
        assert_eq!(hosts[1].user, "ubuntu");
    }

    #[test]
    fn test_hosts_path() {
        assert_eq!(
            hosts_path(Path::new("configs"), "dev"),
            PathBuf::from("configs/dev/hosts.yml")
        );
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = load_hosts(&hosts_path(dir.path(), "staging")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_inventory_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_inventory(&dir, "dev", "hosts: []\n");
        assert!(matches!(load_hosts(&path), Err(Error::Validation(_))));

        let path = write_inventory(&dir, "qa", "{}\n");
        assert!(matches!(load_hosts(&path), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_host_field_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_inventory(&dir, "dev", "hosts:\n  - user: admin\n");
        let err = load_hosts(&path).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn test_validate_hosts() {
        assert!(validate_hosts(&[Host::new("a"), Host::new("b")]).is_ok());
        assert!(validate_hosts(&[Host::new("a"), Host::new("  ")]).is_err());
        assert!(validate_hosts(&[Host::new("-oProxyCommand=x")]).is_err());
    }

    #[test]
    fn test_select_host() {
        let hosts = vec![Host::new("a"), Host::new("b")];
        assert_eq!(select_host(&hosts, 1).unwrap().host, "b");

        let err = select_host(&hosts, 2).unwrap_err();
        assert!(err.to_string().contains("0-1"));
    }
}
