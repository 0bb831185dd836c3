//! Threshold evaluation and report rendering for metrics outcomes

use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{MetricsOutcome, NotificationSink, Outcome, ServiceStatus, Severity, Thresholds};

pub const REPORT_TITLE: &str = "Service Metrics Dashboard";
pub const TEXT_HEADER: &str = "=== Service Metrics Report ===";

const COLUMNS: [&str; 6] = ["Host", "Service", "Status", "CPU(%)", "Memory(%)", "Checked At"];

/// Alerts raised by a sample, in fixed order: CPU, memory, state
pub fn evaluate_thresholds(outcome: &MetricsOutcome, thresholds: &Thresholds) -> Vec<String> {
    let mut alerts = Vec::new();

    if outcome.cpu > thresholds.cpu {
        alerts.push(format!("CPU usage high: {:.1}%", outcome.cpu));
    }
    if outcome.memory > thresholds.memory {
        alerts.push(format!("Memory usage high: {:.1}%", outcome.memory));
    }
    if !outcome.status.is_running() {
        alerts.push(format!("Service not active: {}", outcome.status));
    }

    alerts
}

/// Evaluate thresholds, store the alerts on the outcome and send one
/// WARNING per alert
///
/// Delivery failures are logged only.
pub async fn monitor_health(
    outcome: &mut MetricsOutcome,
    thresholds: &Thresholds,
    sink: &dyn NotificationSink,
) {
    outcome.alerts = evaluate_thresholds(outcome, thresholds);

    for alert in &outcome.alerts {
        let message = format!("{} - {}: {}", outcome.host, outcome.service, alert);
        if !sink.notify(&message, Severity::Warning).await {
            warn!(host = %outcome.host, sink = %sink.name(), "Failed to deliver alert");
        }
    }
}

/// One display row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub host: String,
    pub service: String,
    pub status: ServiceStatus,
    pub cpu: f64,
    pub memory: f64,
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub checked_at: String,
    pub alerts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&MetricsOutcome> for ReportRow {
    fn from(m: &MetricsOutcome) -> Self {
        Self {
            host: m.host.clone(),
            service: m.service.clone(),
            status: m.status.clone(),
            cpu: m.cpu,
            memory: m.memory,
            checked_at: m
                .sampled_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            alerts: m.alerts.clone(),
            error: m.error.clone(),
        }
    }
}

impl ReportRow {
    fn cells(&self) -> [String; 6] {
        [
            self.host.clone(),
            self.service.clone(),
            self.status.to_string(),
            format!("{:.1}", self.cpu),
            format!("{:.1}", self.memory),
            self.checked_at.clone(),
        ]
    }
}

/// Aggregated view of one metrics dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    /// Sorted by host
    pub rows: Vec<ReportRow>,
}

/// Build a report from a result set
///
/// Only metrics outcomes contribute rows. Hosts that failed appear with
/// status `error`.
pub fn aggregate(outcomes: &[Outcome]) -> Report {
    let mut rows: Vec<ReportRow> = outcomes
        .iter()
        .filter_map(|o| match o {
            Outcome::Metrics(m) => Some(ReportRow::from(m)),
            _ => None,
        })
        .collect();
    rows.sort_by(|a, b| a.host.cmp(&b.host));

    debug!(rows = rows.len(), "Aggregated metrics report");
    Report { rows }
}

impl Report {
    /// Fixed-width table
    pub fn table(&self) -> String {
        let cells: Vec<[String; 6]> = self.rows.iter().map(ReportRow::cells).collect();

        let mut widths = COLUMNS.map(|c| c.chars().count());
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let render = |row: &[String]| -> String {
            row.iter()
                .zip(widths.iter())
                .enumerate()
                .map(|(i, (cell, &w))| {
                    // CPU and memory columns are right-aligned
                    if i == 3 || i == 4 {
                        format!("{:>w$}", cell, w = w)
                    } else {
                        format!("{:<w$}", cell, w = w)
                    }
                })
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
        let separator = widths
            .iter()
            .map(|&w| "-".repeat(w))
            .collect::<Vec<_>>()
            .join("-+-");

        let mut lines = vec![REPORT_TITLE.to_string(), render(header.as_slice()), separator];
        lines.extend(cells.iter().map(|row| render(row.as_slice())));
        lines.join("\n")
    }

    /// Plain-text report, one line per row
    pub fn text(&self) -> String {
        let mut lines = vec![TEXT_HEADER.to_string()];
        lines.extend(self.rows.iter().map(|r| {
            format!(
                "Host: {} | Service: {} | Status: {} | CPU: {:.1}% | Memory: {:.1}%",
                r.host, r.service, r.status, r.cpu, r.memory
            )
        }));
        lines.join("\n")
    }

    /// Every alert as (host, service, alert)
    pub fn alerts(&self) -> Vec<(&str, &str, &str)> {
        self.rows
            .iter()
            .flat_map(|r| {
                r.alerts
                    .iter()
                    .map(move |a| (r.host.as_str(), r.service.as_str(), a.as_str()))
            })
            .collect()
    }

    /// Hosts whose collection failed
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.status == ServiceStatus::Error)
            .map(|r| r.host.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use crate::StatusOutcome;

    fn sample(host: &str, status: ServiceStatus, cpu: f64, memory: f64) -> MetricsOutcome {
        MetricsOutcome {
            status,
            cpu,
            memory,
            ..MetricsOutcome::new(host, "nginx")
        }
    }

    #[test]
    fn test_evaluate_thresholds_all_breached() {
        let m = sample("h", ServiceStatus::Failed, 85.0, 90.0);
        assert_eq!(
            evaluate_thresholds(&m, &Thresholds::default()),
            vec![
                "CPU usage high: 85.0%",
                "Memory usage high: 90.0%",
                "Service not active: failed",
            ]
        );
    }

    #[test]
    fn test_evaluate_thresholds_healthy() {
        let m = sample("h", ServiceStatus::Active, 80.0, 12.5);
        assert!(evaluate_thresholds(&m, &Thresholds::default()).is_empty());

        let running = sample("h", ServiceStatus::Other("running".into()), 1.0, 1.0);
        assert!(evaluate_thresholds(&running, &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_evaluate_thresholds_custom_limits() {
        let m = sample("h", ServiceStatus::Active, 55.0, 10.0);
        let limits = Thresholds {
            cpu: 50.0,
            memory: 5.0,
        };
        assert_eq!(
            evaluate_thresholds(&m, &limits),
            vec!["CPU usage high: 55.0%", "Memory usage high: 10.0%"]
        );
    }

    #[tokio::test]
    async fn test_monitor_health_notifies_each_alert() {
        let sink = RecordingSink::new();
        let mut m = sample("web-1", ServiceStatus::Inactive, 95.0, 1.0);

        monitor_health(&mut m, &Thresholds::default(), &sink).await;

        assert_eq!(m.alerts.len(), 2);
        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "web-1 - nginx: CPU usage high: 95.0%");
        assert_eq!(messages[1].0, "web-1 - nginx: Service not active: inactive");
        assert!(messages.iter().all(|(_, sev)| *sev == Severity::Warning));
    }

    #[tokio::test]
    async fn test_monitor_health_survives_failing_sink() {
        let sink = RecordingSink::failing();
        let mut m = sample("web-1", ServiceStatus::Failed, 0.0, 0.0);

        monitor_health(&mut m, &Thresholds::default(), &sink).await;
        assert_eq!(m.alerts, vec!["Service not active: failed"]);
    }

    #[test]
    fn test_aggregate_sorts_and_keeps_failures() {
        let outcomes: Vec<Outcome> = vec![
            sample("web-2", ServiceStatus::Active, 5.2, 2.3).into(),
            MetricsOutcome::failed("db-1", "nginx", "unreachable".into()).into(),
            sample("app-1", ServiceStatus::Active, 0.0, 0.0).into(),
            StatusOutcome::failed("ignored", "nginx", "x".into()).into(),
        ];

        let report = aggregate(&outcomes);
        let hosts: Vec<&str> = report.rows.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["app-1", "db-1", "web-2"]);
        assert_eq!(report.failed_hosts(), vec!["db-1"]);
    }

    #[test]
    fn test_report_text() {
        let outcomes: Vec<Outcome> = vec![
            sample("web-2", ServiceStatus::Active, 5.24, 2.3).into(),
            sample("web-1", ServiceStatus::Inactive, 0.0, 0.0).into(),
        ];

        assert_eq!(
            aggregate(&outcomes).text(),
            "=== Service Metrics Report ===\n\
             Host: web-1 | Service: nginx | Status: inactive | CPU: 0.0% | Memory: 0.0%\n\
             Host: web-2 | Service: nginx | Status: active | CPU: 5.2% | Memory: 2.3%"
        );
    }

    #[test]
    fn test_report_table_layout() {
        let outcomes: Vec<Outcome> = vec![sample("web-1", ServiceStatus::Active, 12.5, 3.0).into()];
        let table = aggregate(&outcomes).table();
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], REPORT_TITLE);
        assert!(lines[1].starts_with("Host  | Service | Status | CPU(%) | Memory(%) | Checked At"));
        assert!(lines[2].starts_with("------+-"));
        assert!(lines[3].starts_with("web-1 | nginx   | active |   12.5 |       3.0 | "));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_report_alerts() {
        let mut m = sample("web-1", ServiceStatus::Failed, 0.0, 0.0);
        m.alerts = vec!["Service not active: failed".into()];
        let report = aggregate(&[Outcome::from(m)]);

        assert_eq!(
            report.alerts(),
            vec![("web-1", "nginx", "Service not active: failed")]
        );
    }

    #[test]
    fn test_empty_report() {
        let report = aggregate(&[]);
        assert!(report.rows.is_empty());
        assert_eq!(report.text(), TEXT_HEADER);
        assert_eq!(report.table().lines().count(), 3);
    }
}
