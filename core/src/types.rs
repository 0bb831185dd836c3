//! Shared types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Default SSH login user for hosts that don't set one
pub const DEFAULT_USER: &str = "ubuntu";

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

/// A target machine reachable over SSH
///
/// Identity is the `host` field. Hosts are loaded once per invocation and
/// only ever read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Host {
    /// Address or hostname
    pub host: String,
    /// Login user
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key path, `~/` is expanded against `$HOME`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_filename: Option<String>,
}

impl Host {
    /// Create a host with the default user and no explicit key
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: default_user(),
            key_filename: None,
        }
    }

    /// Set the login user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the private key path
    pub fn with_key(mut self, key_filename: impl Into<String>) -> Self {
        self.key_filename = Some(key_filename.into());
        self
    }

    /// Resolved private key path, if one is configured and exists on disk
    ///
    /// A missing key file is ignored so the ssh client can fall back to its
    /// own identity search.
    pub fn key_path(&self) -> Option<PathBuf> {
        let raw = self.key_filename.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let path = match raw.strip_prefix("~/") {
            Some(rest) => {
                let home = std::env::var("HOME").ok()?;
                PathBuf::from(home).join(rest)
            }
            None => PathBuf::from(raw),
        };

        path.exists().then_some(path)
    }

    /// `user@host` form used as the ssh destination
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Check a systemd unit name before it is interpolated into a command
pub fn validate_service_name(service: &str) -> Result<()> {
    if service.is_empty() {
        return Err(Error::Validation("service name must not be empty".into()));
    }

    let valid = service
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '@' | '-'));
    if !valid {
        return Err(Error::Validation(format!(
            "invalid service name '{}': only [A-Za-z0-9:_.@-] allowed",
            service
        )));
    }

    Ok(())
}

/// Systemd unit state as reported by `systemctl`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Failed,
    /// The state could not be determined because the host could not be queried
    Error,
    Unknown,
    /// Any other systemd token (`activating`, `reloading`, ...), passed through
    Other(String),
}

impl ServiceStatus {
    /// Parse a state token, passing unrecognized values through
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "" | "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the token is one `systemctl is-active` answers unambiguously
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Active | Self::Inactive | Self::Failed)
    }

    /// Active or running; everything else raises a "not active" alert
    pub fn is_running(&self) -> bool {
        match self {
            Self::Active => true,
            Self::Other(s) => s == "running",
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Unknown => "unknown",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ServiceStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ServiceStatus> for String {
    fn from(s: ServiceStatus) -> Self {
        s.as_str().to_string()
    }
}

/// Privileged systemctl verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Result reported when the verb succeeds
    pub fn completed(&self) -> ActionResult {
        match self {
            Self::Start => ActionResult::Started,
            Self::Stop => ActionResult::Stopped,
            Self::Restart => ActionResult::Restarted,
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Result of a start/stop/restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Started,
    Stopped,
    Restarted,
    Error,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Restarted => "restarted",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a status check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOutcome {
    pub host: String,
    pub service: String,
    pub status: ServiceStatus,
    /// Bare `is-active` token or the head of `systemctl status` output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusOutcome {
    pub fn failed(host: impl Into<String>, service: impl Into<String>, error: String) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            status: ServiceStatus::Error,
            raw: None,
            error: Some(error),
        }
    }
}

/// Outcome of a start/stop/restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub host: String,
    pub service: String,
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn failed(host: impl Into<String>, service: impl Into<String>, error: String) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            result: ActionResult::Error,
            error: Some(error),
        }
    }
}

/// Outcome of a metrics collection
///
/// CPU and memory are instantaneous percentages from the process table.
/// When summed across worker processes they can exceed 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsOutcome {
    pub host: String,
    pub service: String,
    pub status: ServiceStatus,
    pub cpu: f64,
    pub memory: f64,
    pub sampled_at: DateTime<Utc>,
    #[serde(default)]
    pub alerts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricsOutcome {
    /// Zeroed sample with unknown status, stamped now
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            status: ServiceStatus::Unknown,
            cpu: 0.0,
            memory: 0.0,
            sampled_at: Utc::now(),
            alerts: Vec::new(),
            error: None,
        }
    }

    pub fn failed(host: impl Into<String>, service: impl Into<String>, error: String) -> Self {
        Self {
            status: ServiceStatus::Error,
            error: Some(error),
            ..Self::new(host, service)
        }
    }
}

/// The always-present result of one operation against one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Status(StatusOutcome),
    Action(ActionOutcome),
    Metrics(MetricsOutcome),
}

impl Outcome {
    pub fn host(&self) -> &str {
        match self {
            Self::Status(o) => &o.host,
            Self::Action(o) => &o.host,
            Self::Metrics(o) => &o.host,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            Self::Status(o) => &o.service,
            Self::Action(o) => &o.service,
            Self::Metrics(o) => &o.service,
        }
    }

    /// Error message, if the operation failed on this host
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Status(o) => o.error.as_deref(),
            Self::Action(o) => o.error.as_deref(),
            Self::Metrics(o) => o.error.as_deref(),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            Self::Status(o) => o.status == ServiceStatus::Error,
            Self::Action(o) => o.result == ActionResult::Error,
            Self::Metrics(o) => o.status == ServiceStatus::Error,
        }
    }
}

impl From<StatusOutcome> for Outcome {
    fn from(o: StatusOutcome) -> Self {
        Self::Status(o)
    }
}

impl From<ActionOutcome> for Outcome {
    fn from(o: ActionOutcome) -> Self {
        Self::Action(o)
    }
}

impl From<MetricsOutcome> for Outcome {
    fn from(o: MetricsOutcome) -> Self {
        Self::Metrics(o)
    }
}

/// Outcomes of one dispatch, in completion order, one per input host
pub type ResultSet = Vec<Outcome>;

/// Alert limits for metrics, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 80.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_defaults_from_yaml() {
        let host: Host = serde_yaml::from_str("host: 10.0.0.5").unwrap();
        assert_eq!(host.host, "10.0.0.5");
        assert_eq!(host.user, "ubuntu");
        assert!(host.key_filename.is_none());
        assert_eq!(host.destination(), "ubuntu@10.0.0.5");
    }

    #[test]
    fn test_host_missing_key_is_ignored() {
        let host = Host::new("web-1").with_key("/nonexistent/id_ed25519");
        assert!(host.key_path().is_none());
    }

    #[test]
    fn test_host_existing_key_is_used() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let host = Host::new("web-1").with_key(key.path().to_string_lossy());
        assert_eq!(host.key_path().as_deref(), Some(key.path()));
    }

    #[test]
    fn test_service_status_parse() {
        assert_eq!(ServiceStatus::parse("active\n"), ServiceStatus::Active);
        assert_eq!(ServiceStatus::parse("failed"), ServiceStatus::Failed);
        assert_eq!(ServiceStatus::parse(""), ServiceStatus::Unknown);
        assert_eq!(
            ServiceStatus::parse("activating"),
            ServiceStatus::Other("activating".into())
        );
        assert!(!ServiceStatus::parse("activating").is_definitive());
        assert!(ServiceStatus::parse("running").is_running());
        assert!(!ServiceStatus::Inactive.is_running());
    }

    #[test]
    fn test_service_status_serializes_as_token() {
        let json = serde_json::to_string(&ServiceStatus::Other("reloading".into())).unwrap();
        assert_eq!(json, "\"reloading\"");
        let back: ServiceStatus = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(back, ServiceStatus::Inactive);
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("nginx").is_ok());
        assert!(validate_service_name("getty@tty1.service").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("nginx; rm -rf /").is_err());
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome: Outcome = ActionOutcome::failed("db-1", "postgres", "boom".into()).into();
        assert_eq!(outcome.host(), "db-1");
        assert_eq!(outcome.service(), "postgres");
        assert!(outcome.is_error());
        assert_eq!(outcome.error(), Some("boom"));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "action");
        assert_eq!(json["result"], "error");
    }

    #[test]
    fn test_action_completed() {
        assert_eq!(ServiceAction::Start.completed(), ActionResult::Started);
        assert_eq!(ServiceAction::Stop.completed(), ActionResult::Stopped);
        assert_eq!(ServiceAction::Restart.completed(), ActionResult::Restarted);
    }
}
