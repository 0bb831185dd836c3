//! Core library for SvcMgr
//!
//! Host model, remote execution, per-host systemd operations and the
//! parallel dispatcher that fans them out across a fleet.

pub mod dispatcher;
pub mod error;
pub mod fleet;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod remote;
pub mod service;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use dispatcher::{
    HostOperation, MetricsCollection, ParallelDispatcher, ServiceActionOp, StatusCheck,
    DEFAULT_MAX_WORKERS,
};
pub use error::{Error, Result};
pub use fleet::Fleet;
pub use inventory::{hosts_path, load_hosts, select_host, validate_hosts};
pub use metrics::{aggregate, evaluate_thresholds, monitor_health, Report, ReportRow};
pub use notifications::{
    get_secret, mask_token, ConsoleSink, GotifyBackend, NotificationManager, NotificationMessage,
    NotificationSink, NtfyAuth, NtfyBackend, Severity,
};
pub use remote::{RemoteExec, SshExecutor};
pub use service::ServiceController;
pub use types::{
    validate_service_name, ActionOutcome, ActionResult, Host, MetricsOutcome, Outcome, ResultSet,
    ServiceAction, ServiceStatus, StatusOutcome, Thresholds,
};
