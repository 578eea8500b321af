use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use tracing::debug;

use crate::{patch::PatchDocument, Result};

/// Read and patch access to pods
#[async_trait]
pub trait PodClient: Send + Sync + 'static {
    /// Fetch a pod, `None` if it does not exist
    async fn read_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Apply a JSON-Patch document to a pod
    async fn patch_pod(&self, namespace: &str, name: &str, patch: &PatchDocument) -> Result<()>;
}

/// `PodClient` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn read_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pod_api(namespace).get_opt(name).await?)
    }

    async fn patch_pod(&self, namespace: &str, name: &str, patch: &PatchDocument) -> Result<()> {
        let json_patch = patch.to_json_patch()?;
        debug!("Patching pod '{}/{}' with {:?}", namespace, name, patch);
        self.pod_api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(json_patch))
            .await?;
        Ok(())
    }
}
