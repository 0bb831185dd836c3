//! Human-readable and JSON rendering of outcomes

use serde::Serialize;
use svcmgr_core::{ActionOutcome, MetricsOutcome, Outcome, Report, ReportRow, StatusOutcome};
use svcmgr_deploy::{DeployReport, MAX_DIFF_LINES};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn status_line(o: &StatusOutcome) -> String {
    match &o.error {
        Some(e) => format!("{}: {} ({})", o.host, o.status, e),
        None => format!("{}: {}", o.host, o.status),
    }
}

pub fn action_line(o: &ActionOutcome) -> String {
    match &o.error {
        Some(e) => format!("{}: {} failed: {}", o.host, o.service, e),
        None => format!("{}: {} {}", o.host, o.service, o.result),
    }
}

pub fn metrics_panel(m: &MetricsOutcome) -> String {
    let mut lines = vec![
        format!("Host:    {}", m.host),
        format!("Service: {}", m.service),
        format!("Status:  {}", m.status),
        format!("CPU:     {:.1}%", m.cpu),
        format!("Memory:  {:.1}%", m.memory),
        format!(
            "Time:    {}",
            m.sampled_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
        ),
    ];
    if let Some(e) = &m.error {
        lines.push(format!("Error:   {}", e));
    }
    lines.join("\n")
}

/// Alert bullets for one host, or a pass line
pub fn health_summary(row: &ReportRow) -> String {
    if row.alerts.is_empty() {
        return format!("{}: all health checks passed", row.host);
    }

    let mut lines = vec![format!("{}: {} alert(s)", row.host, row.alerts.len())];
    lines.extend(row.alerts.iter().map(|a| format!("  • {}", a)));
    lines.join("\n")
}

/// Hosts whose metrics could not be collected, if any
pub fn failed_hosts_line(report: &Report) -> Option<String> {
    let failed = report.failed_hosts();
    if failed.is_empty() {
        None
    } else {
        Some(format!("Failed hosts: {}", failed.join(", ")))
    }
}

pub fn deploy_summary(r: &DeployReport) -> String {
    let mut lines = Vec::new();
    match &r.backup_path {
        Some(path) => lines.push(format!("Backed up old config to {}", path)),
        None => lines.push("No previous config backed up".to_string()),
    }
    if !r.diff.is_empty() {
        lines.push("Configuration diff:".to_string());
        lines.extend(r.diff.iter().cloned());
        if r.diff_truncated {
            lines.push(format!("... (showing first {} lines)", MAX_DIFF_LINES));
        }
    }
    lines.push(format!("Deployed to {}:{}", r.host, r.target_path));
    lines.join("\n")
}

/// One line per outcome, in the order given
pub fn outcome_lines(results: &[Outcome]) -> Vec<String> {
    results
        .iter()
        .map(|o| match o {
            Outcome::Status(s) => status_line(s),
            Outcome::Action(a) => action_line(a),
            Outcome::Metrics(m) => metrics_panel(m),
        })
        .collect()
}
