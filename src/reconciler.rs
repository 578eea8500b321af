use std::{fmt::Display, future::Future, sync::Arc};

use futures::{pin_mut, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::PodClient,
    config::{Config, ReconcileMode, VolumeSelection},
    diff::AnnotationDiff,
    events::{PodEvent, PodEventKind},
    init_metrics,
    patch::build_patch,
    snapshot::{PodIdentity, PodSnapshot},
    supervisor::{record_outcome, TaskSupervisor},
    Result, ERRORS_TOTAL, POD_EVENTS_TOTAL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SystemNamespace,
    NamespaceNotWatched,
    NotRunning,
    NoVolumes,
}

/// What to do with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(PodIdentity, SkipReason),
    Reconcile(PodSnapshot),
    Remove(PodIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The annotation was patched to include these volumes
    Patched { added: Vec<String> },
    UpToDate,
    /// The pod disappeared before it could be patched
    Gone,
    /// The pod stopped running before it could be patched
    NotRunning,
    /// A newer event or a delete took over; any write result was discarded
    Superseded,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Patched { .. } => "patched",
            ReconcileOutcome::UpToDate => "up_to_date",
            ReconcileOutcome::Gone => "gone",
            ReconcileOutcome::NotRunning => "not_running",
            ReconcileOutcome::Superseded => "superseded",
        }
    }
}

/// Consumes pod events and keeps backup annotations in line with pod volumes
pub struct PodReconciler<C: PodClient> {
    client: Arc<C>,
    config: Config,
    supervisor: Arc<TaskSupervisor>,
}

impl<C: PodClient> PodReconciler<C> {
    pub fn new(client: Arc<C>, config: Config, supervisor: Arc<TaskSupervisor>) -> Self {
        init_metrics();
        Self {
            client,
            config,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    /// Filter an event down to a decision. Pure, no I/O.
    pub fn decide(&self, event: &PodEvent) -> Result<Decision> {
        if event.kind == PodEventKind::Deleted {
            return Ok(Decision::Remove(PodIdentity::from_pod(&event.pod)?));
        }

        let identity = PodIdentity::from_pod(&event.pod)?;
        if self.config.is_system_namespace(&identity.namespace) {
            return Ok(Decision::Skip(identity, SkipReason::SystemNamespace));
        }
        if !self.config.is_namespace_watched(&identity.namespace) {
            return Ok(Decision::Skip(identity, SkipReason::NamespaceNotWatched));
        }

        let snapshot = PodSnapshot::from_pod(&event.pod, self.config.volume_selection)?;
        // Volume mounts are only authoritative once the pod runs
        if !snapshot.is_running() {
            return Ok(Decision::Skip(identity, SkipReason::NotRunning));
        }
        if self.config.mode == ReconcileMode::Serial && snapshot.declared_volumes.is_empty() {
            return Ok(Decision::Skip(identity, SkipReason::NoVolumes));
        }

        Ok(Decision::Reconcile(snapshot))
    }

    /// Process one event. Errors are logged and counted, never returned.
    pub async fn handle_event(&self, event: PodEvent) {
        POD_EVENTS_TOTAL
            .with_label_values(&[event.kind.as_str()])
            .inc();

        let decision = match self.decide(&event) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Skipping {} event for pod '{}/{}': {}",
                    event.kind.as_str(),
                    event.pod.metadata.namespace.as_deref().unwrap_or_default(),
                    event.pod.metadata.name.as_deref().unwrap_or_default(),
                    e
                );
                ERRORS_TOTAL
                    .with_label_values(&["event", e.metric_reason()])
                    .inc();
                if let Ok(identity) = PodIdentity::from_pod(&event.pod) {
                    self.supervisor.cancel(&identity);
                }
                return;
            }
        };

        match decision {
            // Nothing of a system pod is ever submitted
            Decision::Skip(_, SkipReason::SystemNamespace) => {}
            // A newer state that must not be patched invalidates any task still running
            Decision::Skip(identity, _) => self.supervisor.cancel(&identity),
            Decision::Remove(identity) => self.supervisor.cancel(&identity),
            Decision::Reconcile(snapshot) => match self.config.mode {
                ReconcileMode::Serial => {
                    let identity = snapshot.identity.clone();
                    let result =
                        reconcile_snapshot(self.client.as_ref(), &snapshot, &CancellationToken::new())
                            .await;
                    record_outcome(&identity, result);
                }
                ReconcileMode::Supervised => {
                    let client = Arc::clone(&self.client);
                    let selection = self.config.volume_selection;
                    self.supervisor.submit(
                        snapshot.identity.clone(),
                        snapshot,
                        move |snapshot, token| async move {
                            reconcile_latest(client.as_ref(), selection, &snapshot, &token).await
                        },
                    );
                }
            },
        }
    }

    /// Consume `events` until the stream ends or `shutdown` resolves.
    pub async fn run<S, E, F>(&self, events: S, shutdown: F)
    where
        S: Stream<Item = std::result::Result<PodEvent, E>>,
        E: Display,
        F: Future<Output = ()>,
    {
        info!("Watching pods in {:?} mode", self.config.mode);
        let events = events.take_until(shutdown);
        pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.handle_event(event).await,
                Err(e) => {
                    warn!("Pod watch error: {}", e);
                    ERRORS_TOTAL.with_label_values(&["watch", "stream_error"]).inc();
                }
            }
        }
        info!("Pod event stream stopped");
    }
}

/// Patch the annotation described by `snapshot` if it misses any volume.
///
/// Cancellation is checked before the patch call and again once it returns; a
/// write that completes after cancellation is reported as superseded.
pub async fn reconcile_snapshot<C: PodClient + ?Sized>(
    client: &C,
    snapshot: &PodSnapshot,
    token: &CancellationToken,
) -> Result<ReconcileOutcome> {
    let diff = AnnotationDiff::compute(&snapshot.declared_volumes, snapshot.annotation.as_deref());
    let Some(patch) = build_patch(snapshot.has_annotations, snapshot.annotation.is_some(), &diff)
    else {
        return Ok(ReconcileOutcome::UpToDate);
    };

    if token.is_cancelled() {
        return Ok(ReconcileOutcome::Superseded);
    }

    let identity = &snapshot.identity;
    warn!(
        "Reconciling backup volumes annotation on pod '{}': declared={:?}, current={:?}, missing={:?}, new={:?}",
        identity,
        diff.declared,
        diff.current,
        diff.missing,
        diff.desired()
    );

    let result = client
        .patch_pod(&identity.namespace, &identity.name, &patch)
        .await;
    if token.is_cancelled() {
        debug!(
            "Pod '{}' was superseded while its patch was in flight, discarding result {:?}",
            identity,
            result.as_ref().map(|_| ())
        );
        return Ok(ReconcileOutcome::Superseded);
    }
    result?;

    Ok(ReconcileOutcome::Patched {
        added: diff.missing.into_iter().collect(),
    })
}

/// Supervised reconciliation: re-read the pod so the write is based on its
/// latest state, then reconcile that.
pub async fn reconcile_latest<C: PodClient + ?Sized>(
    client: &C,
    selection: VolumeSelection,
    snapshot: &PodSnapshot,
    token: &CancellationToken,
) -> Result<ReconcileOutcome> {
    let diff = AnnotationDiff::compute(&snapshot.declared_volumes, snapshot.annotation.as_deref());
    if diff.is_satisfied() {
        return Ok(ReconcileOutcome::UpToDate);
    }

    let identity = &snapshot.identity;
    let pod = client.read_pod(&identity.namespace, &identity.name).await?;
    if token.is_cancelled() {
        return Ok(ReconcileOutcome::Superseded);
    }
    let Some(pod) = pod else {
        debug!("Pod '{}' no longer exists", identity);
        return Ok(ReconcileOutcome::Gone);
    };

    let latest = PodSnapshot::from_pod(&pod, selection)?;
    if !latest.is_running() {
        debug!("Pod '{}' is {}, not patching", identity, latest.phase);
        return Ok(ReconcileOutcome::NotRunning);
    }
    reconcile_snapshot(client, &latest, token).await
}
