//! Alert delivery: console, Gotify and ntfy.sh
//!
//! Every sink is best-effort. A failed delivery is logged and reported as
//! `false`; it never fails the operation that raised the alert.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Push priority on the 1-5 scale used by Gotify and ntfy
    pub fn priority(&self) -> u8 {
        match self {
            Self::Info => 3,
            Self::Warning | Self::Error => 4,
            Self::Critical => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can deliver an alert
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `message`, returning whether it was accepted
    async fn notify(&self, message: &str, severity: Severity) -> bool;

    fn name(&self) -> &str;
}

/// Read a secret from `VAR`, or from the file named by `VAR_FILE`
///
/// Blank values count as unset.
pub fn get_secret(var_name: &str) -> Option<String> {
    if let Ok(value) = env::var(var_name) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let path = env::var(format!("{}_FILE", var_name)).ok()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let value = content.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Err(e) => {
            warn!(var = %var_name, path = %path, error = %e, "Failed to read secret file");
            None
        }
    }
}

/// Mask sensitive tokens for safe logging
///
/// Keeps the first and last 3 characters of tokens longer than 8
/// characters; shorter tokens are fully masked.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

/// Push notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    /// 1-5
    pub priority: u8,
}

impl NotificationMessage {
    /// Build a push message from an alert line
    ///
    /// Lines shaped `"{host} - {service}: {detail}"` get a title naming the
    /// service and host, with the detail as body.
    pub fn from_alert(message: &str, severity: Severity) -> Self {
        let parsed = message.split_once(" - ").and_then(|(host, rest)| {
            rest.split_once(": ")
                .map(|(service, detail)| (host, service, detail))
        });

        match parsed {
            Some((host, service, detail)) => Self {
                title: format!("[{}] {} alert on {}", severity, service, host),
                body: detail.to_string(),
                priority: severity.priority(),
            },
            None => Self {
                title: format!("[{}] svcmgr alert", severity),
                body: message.to_string(),
                priority: severity.priority(),
            },
        }
    }
}

// ============================================================================
// Console
// ============================================================================

/// Prints alerts to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn format(message: &str, severity: Severity) -> String {
        format!("[{}] {}", severity, message)
    }
}

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn notify(&self, message: &str, severity: Severity) -> bool {
        println!("{}", Self::format(message, severity));
        true
    }

    fn name(&self) -> &str {
        "console"
    }
}

// ============================================================================
// Gotify Backend
// ============================================================================

/// Gotify notification backend
#[derive(Debug, Clone)]
pub struct GotifyBackend {
    client: Client,
    base_url: String,
    key: String,
}

impl GotifyBackend {
    /// Configure from `GOTIFY_URL` and `GOTIFY_KEY` / `GOTIFY_KEY_FILE`
    ///
    /// Returns `None` when no key is set.
    pub fn from_env(client: Client) -> Option<Self> {
        let key = get_secret("GOTIFY_KEY")?;
        let base_url =
            env::var("GOTIFY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        Some(Self::with_url_and_key(client, base_url, key))
    }

    pub fn with_url_and_key(
        client: Client,
        url: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: url.into(),
            key: key.into(),
        }
    }

    /// Gotify requires the /message endpoint
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/message") {
            base.to_string()
        } else {
            format!("{}/message", base)
        }
    }

    pub async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let url = self.endpoint();
        debug!(
            url = %url,
            key = %mask_token(&self.key),
            priority = message.priority,
            "Sending Gotify notification"
        );

        let response = self
            .client
            .post(&url)
            .header("X-Gotify-Key", &self.key)
            .json(&serde_json::json!({
                "title": message.title,
                "message": message.body,
                "priority": message.priority
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("Gotify request failed: {}", e)))?;

        response
            .error_for_status()
            .map_err(|e| Error::Notification(format!("Gotify error: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for GotifyBackend {
    async fn notify(&self, message: &str, severity: Severity) -> bool {
        match self
            .send(&NotificationMessage::from_alert(message, severity))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = "gotify", error = %e, "Notification failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "gotify"
    }
}

// ============================================================================
// ntfy Backend
// ============================================================================

/// ntfy authentication methods
#[derive(Debug, Clone)]
pub enum NtfyAuth {
    /// Bearer token authentication
    Token(String),
    /// Basic authentication (username:password)
    Basic { username: String, password: String },
}

/// ntfy.sh notification backend
#[derive(Debug, Clone)]
pub struct NtfyBackend {
    client: Client,
    base_url: String,
    topic: String,
    auth: Option<NtfyAuth>,
}

impl NtfyBackend {
    /// Configure from `NTFY_URL`, `NTFY_TOPIC` and optional credentials
    ///
    /// Returns `None` when no topic is set.
    pub fn from_env(client: Client) -> Option<Self> {
        let topic = env::var("NTFY_TOPIC").ok()?.trim().to_string();
        if topic.is_empty() {
            return None;
        }
        let base_url = env::var("NTFY_URL").unwrap_or_else(|_| "https://ntfy.sh".to_string());

        let auth = if let Some(token) = get_secret("NTFY_TOKEN") {
            Some(NtfyAuth::Token(token))
        } else if let (Ok(username), Some(password)) =
            (env::var("NTFY_USERNAME"), get_secret("NTFY_PASSWORD"))
        {
            let username = username.trim();
            (!username.is_empty()).then(|| NtfyAuth::Basic {
                username: username.to_string(),
                password,
            })
        } else {
            None
        };

        let backend = Self::with_url_and_topic(client, base_url, topic);
        Some(match auth {
            Some(auth) => backend.with_auth(auth),
            None => backend,
        })
    }

    pub fn with_url_and_topic(
        client: Client,
        url: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: url.into(),
            topic: topic.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: NtfyAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    fn payload(&self, message: &NotificationMessage) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic,
            "title": message.title,
            "message": message.body,
            "priority": message.priority,
        })
    }

    pub async fn send(&self, message: &NotificationMessage) -> Result<()> {
        info!(
            topic = %self.topic,
            title = %message.title,
            priority = message.priority,
            "Sending ntfy notification"
        );

        // Topic travels in the JSON body, so post to the base URL
        let url = self.base_url.trim_end_matches('/');
        let mut request = self.client.post(url).json(&self.payload(message));

        match &self.auth {
            Some(NtfyAuth::Token(token)) => {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            Some(NtfyAuth::Basic { username, password }) => {
                request = request.basic_auth(username, Some(password));
            }
            None => {}
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("ntfy request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Notification(format!(
                "ntfy error: {} - {}",
                status, error_body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for NtfyBackend {
    async fn notify(&self, message: &str, severity: Severity) -> bool {
        match self
            .send(&NotificationMessage::from_alert(message, severity))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = "ntfy", topic = %self.topic, error = %e, "Notification failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "ntfy"
    }
}

// ============================================================================
// Notification Manager
// ============================================================================

/// Fans each alert out to every configured sink
#[derive(Clone, Default)]
pub struct NotificationManager {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationManager {
    /// Console plus whichever push backends the environment configures
    pub fn from_env(client: Client) -> Self {
        let mut manager = Self::new().with_sink(Arc::new(ConsoleSink));

        if let Some(backend) = GotifyBackend::from_env(client.clone()) {
            manager = manager.with_sink(Arc::new(backend));
        }
        if let Some(backend) = NtfyBackend::from_env(client) {
            manager = manager.with_sink(Arc::new(backend));
        }

        debug!(sinks = ?manager.sink_names(), "Notification sinks configured");
        manager
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl NotificationSink for NotificationManager {
    /// True if at least one sink accepted the alert
    async fn notify(&self, message: &str, severity: Severity) -> bool {
        let mut delivered = false;
        for sink in &self.sinks {
            if sink.notify(message, severity).await {
                delivered = true;
            } else {
                warn!(sink = %sink.name(), "Alert not delivered");
            }
        }
        delivered
    }

    fn name(&self) -> &str {
        "manager"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn test_mask_token_long() {
        assert_eq!(mask_token("abc123def456ghi789"), "abc***789");
    }

    #[test]
    fn test_mask_token_short() {
        assert_eq!(mask_token("secret"), "***");
        assert_eq!(mask_token("12345678"), "***");
        assert_eq!(mask_token(""), "***");
    }

    #[test]
    fn test_mask_token_exactly_9() {
        assert_eq!(mask_token("123456789"), "123***789");
    }

    #[test]
    fn test_severity_priority() {
        assert_eq!(Severity::Info.priority(), 3);
        assert_eq!(Severity::Warning.priority(), 4);
        assert_eq!(Severity::Error.priority(), 4);
        assert_eq!(Severity::Critical.priority(), 5);
        assert_eq!(Severity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_message_from_alert() {
        let msg = NotificationMessage::from_alert(
            "web-1 - nginx: CPU usage high: 91.0%",
            Severity::Warning,
        );
        assert_eq!(msg.title, "[WARNING] nginx alert on web-1");
        assert_eq!(msg.body, "CPU usage high: 91.0%");
        assert_eq!(msg.priority, 4);

        let msg = NotificationMessage::from_alert("disk almost full", Severity::Critical);
        assert_eq!(msg.title, "[CRITICAL] svcmgr alert");
        assert_eq!(msg.body, "disk almost full");
        assert_eq!(msg.priority, 5);
    }

    #[test]
    fn test_console_format() {
        assert_eq!(
            ConsoleSink::format("db-1 - postgres: Service not active: failed", Severity::Warning),
            "[WARNING] db-1 - postgres: Service not active: failed"
        );
    }

    #[test]
    fn test_gotify_endpoint() {
        let client = Client::new();
        let backend =
            GotifyBackend::with_url_and_key(client.clone(), "https://gotify.example/", "k");
        assert_eq!(backend.endpoint(), "https://gotify.example/message");

        let backend =
            GotifyBackend::with_url_and_key(client, "https://gotify.example/message", "k");
        assert_eq!(backend.endpoint(), "https://gotify.example/message");
    }

    #[test]
    fn test_ntfy_payload() {
        let backend = NtfyBackend::with_url_and_topic(Client::new(), "https://ntfy.sh", "alerts");
        let payload = backend.payload(&NotificationMessage::from_alert(
            "h - s: Memory usage high: 95.0%",
            Severity::Warning,
        ));
        assert_eq!(payload["topic"], "alerts");
        assert_eq!(payload["priority"], 4);
        assert_eq!(payload["message"], "Memory usage high: 95.0%");
    }

    #[test]
    fn test_get_secret_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "  s3cret-value\n").unwrap();
        env::set_var("SVCMGR_TEST_SECRET_FILE", file.path());

        assert_eq!(
            get_secret("SVCMGR_TEST_SECRET").as_deref(),
            Some("s3cret-value")
        );
        env::remove_var("SVCMGR_TEST_SECRET_FILE");
    }

    #[test]
    fn test_get_secret_unset() {
        assert!(get_secret("SVCMGR_TEST_NEVER_SET").is_none());
    }

    #[tokio::test]
    async fn test_manager_fans_out() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let manager = NotificationManager::new()
            .with_sink(first.clone())
            .with_sink(second.clone());

        assert!(manager.notify("h - s: alert", Severity::Warning).await);
        assert_eq!(first.messages(), vec![("h - s: alert".to_string(), Severity::Warning)]);
        assert_eq!(second.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_manager_reports_partial_delivery() {
        let ok = Arc::new(RecordingSink::new());
        let manager = NotificationManager::new()
            .with_sink(Arc::new(RecordingSink::failing()))
            .with_sink(ok.clone());

        assert!(manager.notify("m", Severity::Info).await);
        assert_eq!(ok.messages().len(), 1);

        let all_failing = NotificationManager::new().with_sink(Arc::new(RecordingSink::failing()));
        assert!(!all_failing.notify("m", Severity::Info).await);
        assert!(!NotificationManager::new().notify("m", Severity::Info).await);
    }
}
