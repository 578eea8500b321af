use std::{collections::BTreeSet, fmt};

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{config::VolumeSelection, Error, Result, BACKUP_VOLUMES_ANNOTATION, RUNNING_PHASE};

/// Namespace and name of a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
}

impl PodIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::MalformedObject("pod has no metadata.name".to_string()))?;
        let namespace = pod.metadata.namespace.clone().ok_or_else(|| {
            Error::MalformedObject(format!("pod '{}' has no metadata.namespace", name))
        })?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the controller needs to know about one observed pod state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub identity: PodIdentity,
    pub phase: String,
    pub declared_volumes: BTreeSet<String>,
    pub has_annotations: bool,
    pub annotation: Option<String>,
}

impl PodSnapshot {
    pub fn from_pod(pod: &Pod, selection: VolumeSelection) -> Result<Self> {
        let identity = PodIdentity::from_pod(pod)?;

        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.clone())
            .ok_or_else(|| Error::MalformedObject(format!("pod '{}' has no status.phase", identity)))?;

        let spec = pod
            .spec
            .as_ref()
            .ok_or_else(|| Error::MalformedObject(format!("pod '{}' has no spec", identity)))?;

        let declared_volumes = spec
            .volumes
            .iter()
            .flatten()
            .filter(|volume| match selection {
                VolumeSelection::PersistentVolumeClaims => volume.persistent_volume_claim.is_some(),
                VolumeSelection::All => true,
            })
            .map(|volume| volume.name.clone())
            .collect();

        Ok(Self {
            identity,
            phase,
            declared_volumes,
            has_annotations: pod.metadata.annotations.is_some(),
            annotation: pod.annotations().get(BACKUP_VOLUMES_ANNOTATION).cloned(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.phase == RUNNING_PHASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn reads_pvc_volumes_and_annotation() {
        let pod = pod(json!({
            "metadata": {
                "name": "db-0",
                "namespace": "apps",
                "annotations": {"backup.velero.io/backup-volumes": "data"}
            },
            "spec": {
                "containers": [],
                "volumes": [
                    {"name": "data", "persistentVolumeClaim": {"claimName": "db-data"}},
                    {"name": "tmp", "emptyDir": {}}
                ]
            },
            "status": {"phase": "Running"}
        }));

        let snapshot = PodSnapshot::from_pod(&pod, VolumeSelection::PersistentVolumeClaims).unwrap();
        assert_eq!(snapshot.identity.to_string(), "apps/db-0");
        assert!(snapshot.is_running());
        assert!(snapshot.has_annotations);
        assert_eq!(snapshot.annotation.as_deref(), Some("data"));
        assert_eq!(
            snapshot.declared_volumes.into_iter().collect::<Vec<_>>(),
            vec!["data"]
        );

        let all = PodSnapshot::from_pod(&pod, VolumeSelection::All).unwrap();
        assert_eq!(all.declared_volumes.len(), 2);
    }

    #[test]
    fn missing_volumes_are_empty() {
        let pod = pod(json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {"containers": []},
            "status": {"phase": "Pending"}
        }));
        let snapshot = PodSnapshot::from_pod(&pod, VolumeSelection::default()).unwrap();
        assert!(snapshot.declared_volumes.is_empty());
        assert!(!snapshot.has_annotations);
        assert!(!snapshot.is_running());
    }

    #[test]
    fn missing_status_is_malformed() {
        let pod = pod(json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {"containers": []}
        }));
        assert!(matches!(
            PodSnapshot::from_pod(&pod, VolumeSelection::default()),
            Err(Error::MalformedObject(_))
        ));
    }

    #[test]
    fn missing_namespace_is_malformed() {
        let pod = pod(json!({"metadata": {"name": "web"}}));
        assert!(matches!(
            PodIdentity::from_pod(&pod),
            Err(Error::MalformedObject(_))
        ));
    }
}
