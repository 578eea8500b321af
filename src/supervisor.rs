use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    reconciler::ReconcileOutcome,
    snapshot::{PodIdentity, PodSnapshot},
    Result, ERRORS_TOTAL, PODS_RECONCILED_TOTAL, TASKS_SUPERSEDED_TOTAL,
};

struct ActiveTask {
    id: u64,
    token: CancellationToken,
}

/// Keeps at most one live reconciliation task per pod.
///
/// Submitting work for a pod cancels whatever task is still running for it;
/// tasks see the cancellation through their token and give up before writing.
#[derive(Default)]
pub struct TaskSupervisor {
    active: DashMap<PodIdentity, ActiveTask>,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

/// Removes the registry entry when its task ends, including on panic.
struct EntryGuard {
    supervisor: Arc<TaskSupervisor>,
    identity: PodIdentity,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.supervisor
            .active
            .remove_if(&self.identity, |_, task| task.id == self.id);
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `work` for `identity`, superseding any task already running for it.
    pub fn submit<F, Fut>(self: &Arc<Self>, identity: PodIdentity, snapshot: PodSnapshot, work: F)
    where
        F: FnOnce(PodSnapshot, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ReconcileOutcome>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        // insert swaps the entry under the shard lock, so check-cancel-replace is atomic per pod
        let previous = self.active.insert(
            identity.clone(),
            ActiveTask {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!("Superseding reconciliation of pod '{}'", identity);
            previous.token.cancel();
        }

        let guard = EntryGuard {
            supervisor: Arc::clone(self),
            identity,
            id,
        };
        self.tracker.spawn(async move {
            match AssertUnwindSafe(work(snapshot, token)).catch_unwind().await {
                Ok(result) => record_outcome(&guard.identity, result),
                Err(_) => {
                    error!("Reconciliation of pod '{}' panicked", guard.identity);
                    ERRORS_TOTAL.with_label_values(&["task", "panic"]).inc();
                }
            }
            drop(guard);
        });
    }

    /// Cancel and forget the task for `identity`, if any.
    pub fn cancel(&self, identity: &PodIdentity) {
        if let Some((_, task)) = self.active.remove(identity) {
            debug!("Cancelling reconciliation of pod '{}'", identity);
            task.token.cancel();
        }
    }

    pub fn is_active(&self, identity: &PodIdentity) -> bool {
        self.active.contains_key(identity)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Wait for every spawned task to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel all pending work and wait for tasks that are mid-write.
    pub async fn shutdown(&self) {
        let count = self.active.len();
        if count > 0 {
            info!("Cancelling {} active reconciliations", count);
        }
        for entry in self.active.iter() {
            entry.value().token.cancel();
        }
        self.active.clear();
        self.drain().await;
    }
}

pub(crate) fn record_outcome(identity: &PodIdentity, result: Result<ReconcileOutcome>) {
    match result {
        Ok(ReconcileOutcome::Superseded) => {
            debug!("Reconciliation of pod '{}' was superseded", identity);
            TASKS_SUPERSEDED_TOTAL.inc();
        }
        Ok(outcome) => {
            PODS_RECONCILED_TOTAL
                .with_label_values(&[outcome.as_str()])
                .inc();
        }
        // Cluster errors correct themselves on the pod's next event
        Err(e) if e.is_transient() => {
            warn!(
                "Cluster error while reconciling pod '{}/{}': {}",
                identity.namespace, identity.name, e
            );
            ERRORS_TOTAL
                .with_label_values(&["cluster", e.metric_reason()])
                .inc();
        }
        Err(e) => {
            error!(
                "Error while reconciling pod '{}/{}': {}",
                identity.namespace, identity.name, e
            );
            ERRORS_TOTAL
                .with_label_values(&["object", e.metric_reason()])
                .inc();
        }
    }
}
