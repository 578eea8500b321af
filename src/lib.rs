use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use thiserror::Error;

pub mod client;
pub mod config;
pub mod diff;
pub mod events;
pub mod patch;
pub mod reconciler;
pub mod snapshot;
pub mod supervisor;

pub use client::{KubePodClient, PodClient};
pub use config::{Config, ReconcileMode, VolumeSelection};
pub use diff::AnnotationDiff;
pub use events::{pod_events, PodEvent, PodEventKind};
pub use patch::{build_patch, PatchDocument, PatchOperation};
pub use reconciler::{Decision, PodReconciler, ReconcileOutcome, SkipReason};
pub use snapshot::{PodIdentity, PodSnapshot};
pub use supervisor::TaskSupervisor;

/// Annotation Velero reads to decide which pod volumes to back up
pub const BACKUP_VOLUMES_ANNOTATION: &str = "backup.velero.io/backup-volumes";
pub const RUNNING_PHASE: &str = "Running";

lazy_static! {
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();
    static ref POD_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pod_events_total", "Total number of pod events received"),
        &["kind"]
    )
    .unwrap();
    static ref PODS_RECONCILED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pods_reconciled_total", "Total number of pod reconciliations"),
        &["outcome"]
    )
    .unwrap();
    static ref TASKS_SUPERSEDED_TOTAL: IntCounter = IntCounter::new(
        "tasks_superseded_total",
        "Total number of reconciliation tasks cancelled by a newer event or a delete"
    )
    .unwrap();
    static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("errors_total", "Total number of errors"),
        &["kind", "reason"]
    )
    .unwrap();
}

/// Initialize Prometheus metrics
pub fn init_metrics() {
    PROMETHEUS_REGISTRY
        .register(Box::new(POD_EVENTS_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(PODS_RECONCILED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(TASKS_SUPERSEDED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .ok();
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed pod object: {0}")]
    MalformedObject(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Errors that the next event for the same pod is expected to correct
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_))
    }

    /// Short label used for the `reason` dimension of `errors_total`
    pub fn metric_reason(&self) -> &'static str {
        match self {
            Error::MalformedObject(_) => "malformed_object",
            Error::Kube(kube::Error::Api(response)) => match response.code {
                404 => "not_found",
                409 => "conflict",
                _ => "api_error",
            },
            Error::Kube(_) => "transport_error",
            Error::Serialization(_) => "serialization_error",
            Error::Config(_) => "config_error",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
