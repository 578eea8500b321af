use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::Api,
    runtime::{watcher, WatchStreamExt},
};

/// Kind of change observed for a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodEventKind {
    Added,
    Modified,
    Deleted,
    /// Pod listed again after the watch (re)started
    Resumed,
}

impl PodEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodEventKind::Added => "added",
            PodEventKind::Modified => "modified",
            PodEventKind::Deleted => "deleted",
            PodEventKind::Resumed => "resumed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PodEvent {
    pub kind: PodEventKind,
    pub pod: Pod,
}

impl PodEvent {
    pub fn new(kind: PodEventKind, pod: Pod) -> Self {
        Self { kind, pod }
    }

    /// Translate a watcher event. Init markers carry no pod and are dropped.
    ///
    /// The watcher does not tell adds from updates, so every `Apply` becomes
    /// `Modified`; both are handled the same way.
    pub fn from_watcher(event: watcher::Event<Pod>) -> Option<Self> {
        match event {
            watcher::Event::Apply(pod) => Some(Self::new(PodEventKind::Modified, pod)),
            watcher::Event::InitApply(pod) => Some(Self::new(PodEventKind::Resumed, pod)),
            watcher::Event::Delete(pod) => Some(Self::new(PodEventKind::Deleted, pod)),
            watcher::Event::Init | watcher::Event::InitDone => None,
        }
    }
}

/// Infinite stream of pod events. Reconnects and relists are handled by the
/// watcher, relisted pods show up as `Resumed`.
pub fn pod_events(
    api: Api<Pod>,
    config: watcher::Config,
) -> impl Stream<Item = Result<PodEvent, watcher::Error>> {
    watcher(api, config)
        .default_backoff()
        .filter_map(|event| future::ready(event.map(PodEvent::from_watcher).transpose()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn watcher_events_map_to_pod_events() {
        let applied = PodEvent::from_watcher(watcher::Event::Apply(pod("a"))).unwrap();
        assert_eq!(applied.kind, PodEventKind::Modified);

        let relisted = PodEvent::from_watcher(watcher::Event::InitApply(pod("b"))).unwrap();
        assert_eq!(relisted.kind, PodEventKind::Resumed);
        assert_eq!(relisted.pod.metadata.name.as_deref(), Some("b"));

        let deleted = PodEvent::from_watcher(watcher::Event::Delete(pod("c"))).unwrap();
        assert_eq!(deleted.kind, PodEventKind::Deleted);
    }

    #[test]
    fn init_markers_are_dropped() {
        assert!(PodEvent::from_watcher(watcher::Event::Init).is_none());
        assert!(PodEvent::from_watcher(watcher::Event::InitDone).is_none());
    }
}
