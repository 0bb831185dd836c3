//! Scripted in-memory [`RemoteExec`] for tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{Error, Host, NotificationSink, RemoteExec, Result, Severity};

/// One recorded `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub host: String,
    pub command: String,
    pub elevated: bool,
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    command: String,
    reply: std::result::Result<String, String>,
}

/// Answers commands from a script of exact-match rules
///
/// Host-specific rules win over global ones. Unscripted commands succeed
/// with empty output. Uploaded files land in an in-memory filesystem that
/// `download` reads back.
#[derive(Debug, Default)]
pub struct ScriptedExec {
    rules: Vec<Rule>,
    unreachable: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    files: Mutex<HashMap<(String, String), String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `command` on every host
    pub fn on(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.rules.push(Rule {
            host: None,
            command: command.into(),
            reply: Ok(output.into()),
        });
        self
    }

    /// Reply to `command` on one host only
    pub fn on_host(
        mut self,
        host: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            host: Some(host.into()),
            command: command.into(),
            reply: Ok(output.into()),
        });
        self
    }

    /// Fail `command` on every host
    pub fn fail(mut self, command: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule {
            host: None,
            command: command.into(),
            reply: Err(message.into()),
        });
        self
    }

    /// Fail every call against `host`
    pub fn unreachable(mut self, host: impl Into<String>) -> Self {
        self.unreachable.insert(host.into());
        self
    }

    /// Panic inside every call against `host`
    pub fn panic_on(mut self, host: impl Into<String>) -> Self {
        self.panicking.insert(host.into());
        self
    }

    /// Hold each `execute` call open for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Seed a remote file
    pub fn with_file(
        self,
        host: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert((host.into(), path.into()), content.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, host: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.host == host)
            .collect()
    }

    /// Remote file content, if present
    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    /// Highest number of `execute` calls observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply(&self, host: &str, command: &str) -> std::result::Result<String, String> {
        let matches = |r: &&Rule| r.command == command;
        self.rules
            .iter()
            .filter(matches)
            .find(|r| r.host.as_deref() == Some(host))
            .or_else(|| self.rules.iter().filter(matches).find(|r| r.host.is_none()))
            .map(|r| r.reply.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn check_host(&self, host: &Host) -> Result<()> {
        if self.panicking.contains(&host.host) {
            panic!("scripted panic on {}", host.host);
        }
        if self.unreachable.contains(&host.host) {
            return Err(Error::remote(&host.host, "Connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExec for ScriptedExec {
    async fn execute(&self, host: &Host, command: &str, elevated: bool) -> Result<String> {
        self.calls.lock().unwrap().push(Call {
            host: host.host.clone(),
            command: command.to_string(),
            elevated,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_host(host)?;

        match self.reply(&host.host, command) {
            Ok(out) => Ok(out.trim().to_string()),
            Err(message) => Err(Error::remote(&host.host, message)),
        }
    }

    async fn upload(&self, host: &Host, local_path: &Path, remote_path: &str) -> Result<()> {
        self.check_host(host)?;
        let content = std::fs::read_to_string(local_path)?;
        self.files
            .lock()
            .unwrap()
            .insert((host.host.clone(), remote_path.to_string()), content);
        Ok(())
    }

    async fn download(&self, host: &Host, remote_path: &str, local_path: &Path) -> Result<()> {
        self.check_host(host)?;
        let content = self
            .file(&host.host, remote_path)
            .ok_or_else(|| Error::remote(&host.host, format!("No such file: {}", remote_path)))?;
        std::fs::write(local_path, content)?;
        Ok(())
    }
}

/// Records every alert it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, Severity)>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records but reports every delivery as failed
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, message: &str, severity: Severity) -> bool {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
        !self.failing
    }

    fn name(&self) -> &str {
        "recording"
    }
}
