//! Bounded fan-out of one operation across many hosts
//!
//! The dispatcher guarantees exactly one [`Outcome`] per input host. An
//! operation that returns `Err` or panics is converted into that
//! operation's error outcome, naming the host.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    metrics::{evaluate_thresholds, monitor_health},
    ActionOutcome, Error, Host, MetricsOutcome, NotificationSink, Outcome, Result, ResultSet,
    ServiceAction, ServiceController, StatusOutcome, Thresholds,
};

/// Default concurrency bound
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// A single-host operation the dispatcher can fan out
#[async_trait]
pub trait HostOperation: Send + Sync + 'static {
    /// Operation name for logging
    fn name(&self) -> &str;

    fn service(&self) -> &str;

    async fn run(&self, host: &Host) -> Result<Outcome>;

    /// Error outcome for a host whose run failed or panicked
    fn failed(&self, host: &Host, message: String) -> Outcome;
}

/// Error text for `host`, prefixed with the host unless the error is a
/// remote execution error raised for that exact host
fn attribute(host: &Host, err: &Error) -> String {
    match err {
        Error::RemoteExecution { host: h, .. } if *h == host.host => err.to_string(),
        _ => format!("{}: {}", host.host, err),
    }
}

/// Runs a [`HostOperation`] on every host with bounded concurrency
#[derive(Debug, Clone, Copy)]
pub struct ParallelDispatcher {
    max_workers: usize,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl ParallelDispatcher {
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Concurrency for a batch: `max(1, min(max_workers, host_count))`
    pub fn worker_count(&self, host_count: usize) -> usize {
        self.max_workers.min(host_count).max(1)
    }

    /// Run `operation` on every host and collect outcomes in completion order
    ///
    /// Returns once every host has an outcome. The result always has one
    /// entry per input host.
    #[instrument(skip(self, hosts, operation), fields(op = %operation.name(), hosts = hosts.len()))]
    pub async fn dispatch(&self, hosts: &[Host], operation: Arc<dyn HostOperation>) -> ResultSet {
        if hosts.is_empty() {
            debug!("No hosts to dispatch to");
            return Vec::new();
        }

        let workers = self.worker_count(hosts.len());
        info!(
            service = %operation.service(),
            workers,
            "Dispatching to {} host(s)",
            hosts.len()
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<Id, Host> = HashMap::with_capacity(hosts.len());

        for host in hosts {
            let task_host = host.clone();
            let op = Arc::clone(&operation);
            let semaphore = Arc::clone(&semaphore);

            let handle = tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return op.failed(&task_host, format!("{}: {}", task_host.host, e));
                    }
                };

                match op.run(&task_host).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(host = %task_host.host, error = %e, "Operation failed");
                        op.failed(&task_host, attribute(&task_host, &e))
                    }
                }
            });
            pending.insert(handle.id(), host.clone());
        }

        let mut results = Vec::with_capacity(hosts.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    results.push(outcome);
                }
                Err(e) => match pending.remove(&e.id()) {
                    Some(host) => {
                        error!(host = %host.host, error = %e, "Task for host did not complete");
                        let message = format!("task for host {} aborted: {}", host.host, e);
                        results.push(operation.failed(&host, message));
                    }
                    None => error!(error = %e, "Joined unknown task"),
                },
            }
        }

        let failed = results.iter().filter(|o| o.is_error()).count();
        info!(succeeded = results.len() - failed, failed, "Dispatch complete");
        results
    }
}

// ============================================================================
// Built-in operations
// ============================================================================

/// `check_status` on each host
pub struct StatusCheck {
    controller: ServiceController,
    service: String,
}

impl StatusCheck {
    pub fn new(controller: ServiceController, service: impl Into<String>) -> Self {
        Self {
            controller,
            service: service.into(),
        }
    }
}

#[async_trait]
impl HostOperation for StatusCheck {
    fn name(&self) -> &str {
        "status"
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn run(&self, host: &Host) -> Result<Outcome> {
        Ok(self.controller.check_status(host, &self.service).await.into())
    }

    fn failed(&self, host: &Host, message: String) -> Outcome {
        StatusOutcome::failed(&host.host, &self.service, message).into()
    }
}

/// start, stop or restart on each host
pub struct ServiceActionOp {
    controller: ServiceController,
    service: String,
    action: ServiceAction,
}

impl ServiceActionOp {
    pub fn new(
        controller: ServiceController,
        service: impl Into<String>,
        action: ServiceAction,
    ) -> Self {
        Self {
            controller,
            service: service.into(),
            action,
        }
    }
}

#[async_trait]
impl HostOperation for ServiceActionOp {
    fn name(&self) -> &str {
        self.action.verb()
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn run(&self, host: &Host) -> Result<Outcome> {
        Ok(self
            .controller
            .run_action(host, &self.service, self.action)
            .await
            .into())
    }

    fn failed(&self, host: &Host, message: String) -> Outcome {
        ActionOutcome::failed(&host.host, &self.service, message).into()
    }
}

/// `collect_metrics` on each host, optionally followed by threshold checks
///
/// With a sink, every alert is also sent as a notification.
pub struct MetricsCollection {
    controller: ServiceController,
    service: String,
    thresholds: Option<Thresholds>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl MetricsCollection {
    pub fn new(controller: ServiceController, service: impl Into<String>) -> Self {
        Self {
            controller,
            service: service.into(),
            thresholds: None,
            sink: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[async_trait]
impl HostOperation for MetricsCollection {
    fn name(&self) -> &str {
        "metrics"
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn run(&self, host: &Host) -> Result<Outcome> {
        let mut metrics = self.controller.collect_metrics(host, &self.service).await;

        if let Some(thresholds) = &self.thresholds {
            match &self.sink {
                Some(sink) => monitor_health(&mut metrics, thresholds, sink.as_ref()).await,
                None => metrics.alerts = evaluate_thresholds(&metrics, thresholds),
            }
        }

        Ok(metrics.into())
    }

    fn failed(&self, host: &Host, message: String) -> Outcome {
        MetricsOutcome::failed(&host.host, &self.service, message).into()
    }
}
