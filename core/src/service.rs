//! Per-host systemd operations
//!
//! Each operation is total: failures on the host are folded into the
//! returned outcome instead of being propagated, so a caller fanning out
//! across many hosts always gets one outcome per host.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, instrument, warn};

use crate::{
    ActionOutcome, Error, Host, MetricsOutcome, RemoteExec, Result, ServiceAction, ServiceStatus,
    StatusOutcome,
};

/// Characters of `systemctl status` output kept as raw detail
pub const RAW_DETAIL_LIMIT: usize = 300;

/// PIDs sampled by the pattern-match fallback
pub const MAX_FALLBACK_PIDS: usize = 5;

// `systemctl is-active` exits non-zero for inactive and failed units while
// still printing the state; `|| true` keeps those answers readable.
pub(crate) fn is_active_command(service: &str) -> String {
    format!("systemctl is-active {} || true", service)
}

// `systemctl status` exits 3 for inactive units.
pub(crate) fn status_detail_command(service: &str) -> String {
    format!("systemctl status {} --no-pager || true", service)
}

pub(crate) fn main_pid_command(service: &str) -> String {
    format!("systemctl show {} --property=MainPID --value", service)
}

pub(crate) fn pgrep_command(service: &str) -> String {
    format!("pgrep -f {}", service)
}

pub(crate) fn ps_sample_command(pid: u32) -> String {
    format!("ps -p {} -o %cpu=,%mem=", pid)
}

pub(crate) fn action_command(action: ServiceAction, service: &str) -> String {
    format!("systemctl {} {}", action.verb(), service)
}

fn active_line() -> Result<&'static Regex> {
    static RE: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = RE.get() {
        return Ok(re);
    }
    let re = Regex::new(r"Active:\s+(\w+)").map_err(|e| Error::Parse(e.to_string()))?;
    Ok(RE.get_or_init(|| re))
}

/// Extract the state word following `Active:` in `systemctl status` output
pub fn parse_active_state(detail: &str) -> Result<&str> {
    active_line()?
        .captures(detail)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| Error::Parse("no 'Active: <state>' line in status output".into()))
}

/// Parse `ps -o %cpu=,%mem=` output into (cpu, memory)
///
/// Empty output means the process is gone.
pub fn parse_ps_sample(output: &str) -> Result<Option<(f64, f64)>> {
    let parts: Vec<&str> = output.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(None);
    }
    if parts.len() < 2 {
        return Err(Error::Parse(format!("unexpected ps output: {}", output)));
    }

    let cpu: f64 = parts[0]
        .parse()
        .map_err(|_| Error::Parse(format!("invalid cpu value: {}", parts[0])))?;
    let mem: f64 = parts[1]
        .parse()
        .map_err(|_| Error::Parse(format!("invalid memory value: {}", parts[1])))?;

    Ok(Some((cpu, mem)))
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

/// Systemd service operations against single hosts
#[derive(Clone)]
pub struct ServiceController {
    exec: Arc<dyn RemoteExec>,
}

impl ServiceController {
    pub fn new(exec: Arc<dyn RemoteExec>) -> Self {
        Self { exec }
    }

    /// Check a service's state
    ///
    /// Uses `systemctl is-active` and falls back to parsing the verbose
    /// `systemctl status` output when the short answer is ambiguous.
    #[instrument(skip(self), fields(host = %host.host))]
    pub async fn check_status(&self, host: &Host, service: &str) -> StatusOutcome {
        match self.query_status(host, service).await {
            Ok((status, raw)) => {
                debug!(status = %status, "Status resolved");
                StatusOutcome {
                    host: host.host.clone(),
                    service: service.to_string(),
                    status,
                    raw: Some(raw),
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Status check failed");
                StatusOutcome::failed(&host.host, service, e.to_string())
            }
        }
    }

    async fn query_status(&self, host: &Host, service: &str) -> Result<(ServiceStatus, String)> {
        let token = self
            .exec
            .execute(host, &is_active_command(service), false)
            .await?;
        let token = token.trim();

        let status = ServiceStatus::parse(token);
        if status.is_definitive() {
            return Ok((status, token.to_string()));
        }

        debug!(token = %token, "Ambiguous is-active answer, reading full status");
        let detail = self
            .exec
            .execute(host, &status_detail_command(service), false)
            .await?;

        let status = match parse_active_state(&detail) {
            Ok(state) => ServiceStatus::parse(state),
            Err(e) => {
                debug!(error = %e, "Falling back to raw is-active value");
                ServiceStatus::parse(token)
            }
        };

        Ok((status, truncate(&detail, RAW_DETAIL_LIMIT)))
    }

    /// Run a privileged systemctl verb once
    #[instrument(skip(self), fields(host = %host.host))]
    pub async fn run_action(
        &self,
        host: &Host,
        service: &str,
        action: ServiceAction,
    ) -> ActionOutcome {
        match self
            .exec
            .execute(host, &action_command(action, service), true)
            .await
        {
            Ok(_) => {
                info!(service = %service, action = %action, "Service action completed");
                ActionOutcome {
                    host: host.host.clone(),
                    service: service.to_string(),
                    result: action.completed(),
                    error: None,
                }
            }
            Err(e) => {
                warn!(service = %service, action = %action, error = %e, "Service action failed");
                ActionOutcome::failed(&host.host, service, e.to_string())
            }
        }
    }

    pub async fn start(&self, host: &Host, service: &str) -> ActionOutcome {
        self.run_action(host, service, ServiceAction::Start).await
    }

    pub async fn stop(&self, host: &Host, service: &str) -> ActionOutcome {
        self.run_action(host, service, ServiceAction::Stop).await
    }

    pub async fn restart(&self, host: &Host, service: &str) -> ActionOutcome {
        self.run_action(host, service, ServiceAction::Restart).await
    }

    /// Collect status, CPU and memory for a service
    ///
    /// Three best-effort stages run in order; a failing stage leaves its
    /// fields at their defaults and the next stage still runs:
    ///
    /// 1. state via `systemctl is-active`
    /// 2. `ps` sample of the unit's MainPID
    /// 3. if CPU is still zero, the summed `ps` samples of up to five PIDs
    ///    matching the service name, for services whose workers run under a
    ///    different PID than the one systemd tracks
    ///
    /// The stage 3 sum can exceed 100% and can count the main process twice.
    #[instrument(skip(self), fields(host = %host.host))]
    pub async fn collect_metrics(&self, host: &Host, service: &str) -> MetricsOutcome {
        let mut metrics = MetricsOutcome::new(&host.host, service);

        match self
            .exec
            .execute(host, &is_active_command(service), false)
            .await
        {
            Ok(out) if out.trim().is_empty() => metrics.status = ServiceStatus::Inactive,
            Ok(out) => metrics.status = ServiceStatus::parse(&out),
            Err(e) => {
                warn!(error = %e, "Failed to read service state");
                metrics.status = ServiceStatus::Error;
                metrics.error = Some(e.to_string());
            }
        }

        match self.sample_main_pid(host, service).await {
            Ok(Some((cpu, mem))) => {
                metrics.cpu = cpu;
                metrics.memory = mem;
            }
            Ok(None) => debug!("No main PID to sample"),
            Err(e) => warn!(error = %e, "Main PID sampling failed"),
        }

        if metrics.cpu == 0.0 {
            match self.sample_matching(host, service).await {
                Ok(Some((cpu, mem))) => {
                    metrics.cpu = cpu;
                    metrics.memory = mem;
                }
                Ok(None) => debug!("No matching processes"),
                Err(e) => debug!(error = %e, "Pattern sampling failed"),
            }
        }

        debug!(
            status = %metrics.status,
            cpu = metrics.cpu,
            memory = metrics.memory,
            "Metrics collected"
        );
        metrics
    }

    async fn sample_main_pid(&self, host: &Host, service: &str) -> Result<Option<(f64, f64)>> {
        let output = self
            .exec
            .execute(host, &main_pid_command(service), false)
            .await?;
        let output = output.trim();

        if output.is_empty() || output == "0" {
            return Ok(None);
        }

        let pid: u32 = output
            .parse()
            .map_err(|_| Error::Parse(format!("invalid MainPID: {}", output)))?;

        self.sample_pid(host, pid).await
    }

    async fn sample_matching(&self, host: &Host, service: &str) -> Result<Option<(f64, f64)>> {
        let output = self
            .exec
            .execute(host, &pgrep_command(service), false)
            .await?;

        let pids: Vec<u32> = output
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .take(MAX_FALLBACK_PIDS)
            .collect();

        if pids.is_empty() {
            return Ok(None);
        }

        let mut total_cpu = 0.0;
        let mut total_mem = 0.0;
        for pid in pids {
            match self.sample_pid(host, pid).await {
                Ok(Some((cpu, mem))) => {
                    total_cpu += cpu;
                    total_mem += mem;
                }
                Ok(None) => {}
                Err(e) => debug!(pid, error = %e, "Skipping PID"),
            }
        }

        Ok(Some((total_cpu, total_mem)))
    }

    async fn sample_pid(&self, host: &Host, pid: u32) -> Result<Option<(f64, f64)>> {
        let output = self
            .exec
            .execute(host, &ps_sample_command(pid), false)
            .await?;
        parse_ps_sample(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExec;
    use crate::ActionResult;

    fn controller(exec: ScriptedExec) -> (ServiceController, Arc<ScriptedExec>) {
        let exec = Arc::new(exec);
        (ServiceController::new(exec.clone()), exec)
    }

    const INACTIVE_DETAIL: &str = "\
● myapp.service - My Application
     Loaded: loaded
     Active: inactive (dead)
";

    #[test]
    fn test_parse_active_state() {
        assert_eq!(parse_active_state(INACTIVE_DETAIL).unwrap(), "inactive");
        assert_eq!(
            parse_active_state("   Active: active (running) since Mon").unwrap(),
            "active"
        );
        assert!(parse_active_state("no state here").is_err());
        assert!(parse_active_state("Active:   ").is_err());
        assert!(parse_active_state("Active:inactive").is_err());
        assert_eq!(
            parse_active_state("Loaded: loaded\n   Active:\tfailed (Result: exit-code)").unwrap(),
            "failed"
        );
    }

    #[test]
    fn test_parse_ps_sample() {
        assert_eq!(parse_ps_sample(" 5.2  2.3\n").unwrap(), Some((5.2, 2.3)));
        assert_eq!(parse_ps_sample("").unwrap(), None);
        assert!(parse_ps_sample("abc def").is_err());
        assert!(parse_ps_sample("1.0").is_err());
    }

    #[tokio::test]
    async fn test_check_status_definitive() {
        let (ctl, exec) = controller(ScriptedExec::new().on(is_active_command("nginx"), "active"));
        let host = Host::new("localhost");

        let outcome = ctl.check_status(&host, "nginx").await;
        assert_eq!(outcome.host, "localhost");
        assert_eq!(outcome.service, "nginx");
        assert_eq!(outcome.status, ServiceStatus::Active);
        assert_eq!(outcome.raw.as_deref(), Some("active"));
        assert_eq!(exec.calls_for("localhost").len(), 1);
    }

    #[tokio::test]
    async fn test_check_status_parses_verbose_output() {
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("myapp"), "")
                .on(status_detail_command("myapp"), INACTIVE_DETAIL),
        );

        let outcome = ctl.check_status(&Host::new("testhost"), "myapp").await;
        assert_eq!(outcome.status, ServiceStatus::Inactive);
        assert!(outcome.raw.unwrap().contains("Active: inactive (dead)"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_check_status_falls_back_to_raw_token() {
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("myapp"), "activating")
                .on(status_detail_command("myapp"), "garbled"),
        );

        let outcome = ctl.check_status(&Host::new("testhost"), "myapp").await;
        assert_eq!(outcome.status, ServiceStatus::Other("activating".into()));
    }

    #[tokio::test]
    async fn test_check_status_raw_detail_truncated() {
        let long = format!("Active: active (running)\n{}", "x".repeat(1000));
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("app"), "reloading")
                .on(status_detail_command("app"), long),
        );

        let outcome = ctl.check_status(&Host::new("h"), "app").await;
        assert_eq!(outcome.status, ServiceStatus::Active);
        assert_eq!(outcome.raw.unwrap().chars().count(), RAW_DETAIL_LIMIT);
    }

    #[tokio::test]
    async fn test_check_status_error_is_captured() {
        let (ctl, _) = controller(ScriptedExec::new().unreachable("badhost"));

        let outcome = ctl.check_status(&Host::new("badhost"), "nginx").await;
        assert_eq!(outcome.status, ServiceStatus::Error);
        assert!(outcome.error.unwrap().contains("badhost"));
    }

    #[tokio::test]
    async fn test_check_status_is_idempotent() {
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("myapp"), "")
                .on(status_detail_command("myapp"), INACTIVE_DETAIL),
        );
        let host = Host::new("testhost");

        let first = ctl.check_status(&host, "myapp").await;
        let second = ctl.check_status(&host, "myapp").await;
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_actions_are_elevated() {
        let (ctl, exec) = controller(ScriptedExec::new());
        let host = Host::new("localhost");

        assert_eq!(ctl.start(&host, "nginx").await.result, ActionResult::Started);
        assert_eq!(ctl.stop(&host, "nginx").await.result, ActionResult::Stopped);
        assert_eq!(
            ctl.restart(&host, "nginx").await.result,
            ActionResult::Restarted
        );

        let calls = exec.calls_for("localhost");
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.elevated));
        assert_eq!(calls[0].command, "systemctl start nginx");
        assert_eq!(calls[2].command, "systemctl restart nginx");
    }

    #[tokio::test]
    async fn test_action_failure_captured() {
        let (ctl, _) = controller(
            ScriptedExec::new().fail(
                action_command(ServiceAction::Start, "nginx"),
                "Permission denied",
            ),
        );

        let outcome = ctl.start(&Host::new("localhost"), "nginx").await;
        assert_eq!(outcome.result, ActionResult::Error);
        assert!(outcome.error.unwrap().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_collect_metrics_main_pid() {
        let (ctl, exec) = controller(
            ScriptedExec::new()
                .on(is_active_command("nginx"), "active")
                .on(main_pid_command("nginx"), "1234")
                .on(ps_sample_command(1234), "5.2  2.3"),
        );

        let m = ctl.collect_metrics(&Host::new("localhost"), "nginx").await;
        assert_eq!(m.status, ServiceStatus::Active);
        assert_eq!(m.cpu, 5.2);
        assert_eq!(m.memory, 2.3);
        assert!(m.alerts.is_empty());
        // No fallback when the main PID already reports CPU
        assert!(!exec
            .calls_for("localhost")
            .iter()
            .any(|c| c.command.starts_with("pgrep")));
    }

    #[tokio::test]
    async fn test_collect_metrics_fallback_sums_workers() {
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("gunicorn"), "active")
                .on(main_pid_command("gunicorn"), "100")
                .on(ps_sample_command(100), "0.0 0.4")
                .on(pgrep_command("gunicorn"), "201\n202\n203")
                .on(ps_sample_command(201), "1.0 2.0")
                .on(ps_sample_command(202), "2.0 3.0")
                .on(ps_sample_command(203), "0.5 1.0"),
        );

        let m = ctl.collect_metrics(&Host::new("app-1"), "gunicorn").await;
        assert_eq!(m.cpu, 3.5);
        assert_eq!(m.memory, 6.0);
    }

    #[tokio::test]
    async fn test_collect_metrics_fallback_caps_pids_and_skips_failures() {
        let (ctl, exec) = controller(
            ScriptedExec::new()
                .on(is_active_command("worker"), "active")
                .on(main_pid_command("worker"), "0")
                .on(pgrep_command("worker"), "1\n2\n3\n4\n5\n6\n7")
                .on(ps_sample_command(1), "1.0 1.0")
                .fail(ps_sample_command(2), "no such process")
                .on(ps_sample_command(3), "1.0 1.0")
                .on(ps_sample_command(4), "")
                .on(ps_sample_command(5), "1.0 1.0")
                .on(ps_sample_command(6), "50.0 50.0"),
        );

        let m = ctl.collect_metrics(&Host::new("h"), "worker").await;
        assert_eq!(m.cpu, 3.0);
        assert_eq!(m.memory, 3.0);
        assert!(!exec
            .calls_for("h")
            .iter()
            .any(|c| c.command == ps_sample_command(6)));
    }

    #[tokio::test]
    async fn test_collect_metrics_inactive_service() {
        let (ctl, _) = controller(
            ScriptedExec::new()
                .on(is_active_command("myapp"), "inactive")
                .on(main_pid_command("myapp"), "0")
                .fail(pgrep_command("myapp"), "exit status 1"),
        );

        let m = ctl.collect_metrics(&Host::new("testhost"), "myapp").await;
        assert_eq!(m.status, ServiceStatus::Inactive);
        assert_eq!(m.cpu, 0.0);
        assert_eq!(m.memory, 0.0);
        assert!(m.error.is_none());
    }

    #[tokio::test]
    async fn test_collect_metrics_unreachable_host() {
        let (ctl, _) = controller(ScriptedExec::new().unreachable("down"));

        let m = ctl.collect_metrics(&Host::new("down"), "nginx").await;
        assert_eq!(m.host, "down");
        assert_eq!(m.service, "nginx");
        assert_eq!(m.status, ServiceStatus::Error);
        assert_eq!(m.cpu, 0.0);
        assert!(m.error.unwrap().contains("down"));
    }

    #[tokio::test]
    async fn test_collect_metrics_empty_state_is_inactive() {
        let (ctl, _) = controller(ScriptedExec::new());

        let m = ctl.collect_metrics(&Host::new("h"), "svc").await;
        assert_eq!(m.status, ServiceStatus::Inactive);
    }
}
