//! Fleet-wide service operations
//!
//! [`Fleet`] is the entry point for callers: it validates inputs, builds the
//! matching [`HostOperation`] and hands it to the dispatcher.

use std::sync::Arc;
use tracing::info;

use crate::{
    aggregate, validate_hosts, validate_service_name, Host, HostOperation, MetricsCollection,
    NotificationSink, ParallelDispatcher, RemoteExec, Report, Result, ResultSet, ServiceAction,
    ServiceActionOp, ServiceController, StatusCheck, Thresholds,
};

/// Dispatcher, controller and alert sink bundled for one invocation
#[derive(Clone)]
pub struct Fleet {
    dispatcher: ParallelDispatcher,
    controller: ServiceController,
    sink: Arc<dyn NotificationSink>,
}

impl Fleet {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        dispatcher: ParallelDispatcher,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            dispatcher,
            controller: ServiceController::new(exec),
            sink,
        }
    }

    async fn run(
        &self,
        hosts: &[Host],
        service: &str,
        operation: Arc<dyn HostOperation>,
    ) -> Result<ResultSet> {
        validate_hosts(hosts)?;
        validate_service_name(service)?;
        Ok(self.dispatcher.dispatch(hosts, operation).await)
    }

    pub async fn dispatch_status(&self, hosts: &[Host], service: &str) -> Result<ResultSet> {
        let op = StatusCheck::new(self.controller.clone(), service);
        self.run(hosts, service, Arc::new(op)).await
    }

    pub async fn dispatch_action(
        &self,
        hosts: &[Host],
        service: &str,
        action: ServiceAction,
    ) -> Result<ResultSet> {
        info!(service = %service, action = %action, hosts = hosts.len(), "Running service action");
        let op = ServiceActionOp::new(self.controller.clone(), service, action);
        self.run(hosts, service, Arc::new(op)).await
    }

    pub async fn dispatch_start(&self, hosts: &[Host], service: &str) -> Result<ResultSet> {
        self.dispatch_action(hosts, service, ServiceAction::Start).await
    }

    pub async fn dispatch_stop(&self, hosts: &[Host], service: &str) -> Result<ResultSet> {
        self.dispatch_action(hosts, service, ServiceAction::Stop).await
    }

    pub async fn dispatch_restart(&self, hosts: &[Host], service: &str) -> Result<ResultSet> {
        self.dispatch_action(hosts, service, ServiceAction::Restart).await
    }

    /// Collect metrics; with thresholds, alerts are evaluated and sent to
    /// the sink
    pub async fn dispatch_metrics(
        &self,
        hosts: &[Host],
        service: &str,
        thresholds: Option<Thresholds>,
    ) -> Result<ResultSet> {
        let mut op = MetricsCollection::new(self.controller.clone(), service);
        if let Some(thresholds) = thresholds {
            op = op
                .with_thresholds(thresholds)
                .with_sink(Arc::clone(&self.sink));
        }
        self.run(hosts, service, Arc::new(op)).await
    }

    pub async fn collect_and_aggregate(
        &self,
        hosts: &[Host],
        service: &str,
        thresholds: Option<Thresholds>,
    ) -> Result<Report> {
        let results = self.dispatch_metrics(hosts, service, thresholds).await?;
        Ok(aggregate(&results))
    }
}
