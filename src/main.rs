use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::{api::Api, runtime::watcher, Client};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::prelude::*;
use velero_annotations_controller::{
    pod_events, Config, KubePodClient, PodReconciler, TaskSupervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::filter::Targets::new()
        .with_target("velero_annotations_controller", level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let config = Config::from_env()?;
    info!("Starting controller with {:?}", config);

    let client = Client::try_default().await?;
    let pod_api: Api<Pod> = Api::all(client.clone());
    let supervisor = Arc::new(TaskSupervisor::new());
    let reconciler = PodReconciler::new(
        Arc::new(KubePodClient::new(client)),
        config,
        supervisor.clone(),
    );

    let mut terminate = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        info!("Closing controller.");
    };

    reconciler
        .run(pod_events(pod_api, watcher::Config::default()), shutdown)
        .await;
    supervisor.shutdown().await;
    info!("Controller stopped");
    Ok(())
}
