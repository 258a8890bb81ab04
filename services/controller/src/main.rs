//! Vesta controller entry point.
//!
//! # Purpose
//! Wires configuration, observability and the in-memory store, applies an
//! optional seed manifest, then runs the watch driver until ctrl-c.
use anyhow::Context;
use controller::config::ControllerConfig;
use controller::manifest::Manifest;
use controller::observability;
use controller::store::memory::InMemoryStore;
use controller::{Controller, build_controller};
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::from_env_or_yaml().context("controller config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: ControllerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("vesta-controller");
    let controller = start(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    tracing::info!(
        cluster = %config.cluster_name,
        metrics = %config.metrics_bind,
        "controller running"
    );
    controller.run(config.sync_interval, shutdown).await;

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn start(config: &ControllerConfig) -> anyhow::Result<Controller> {
    let store = Arc::new(InMemoryStore::new(config.store_config()));
    let controller = build_controller(store, config)
        .await
        .context("build controller")?;
    if let Some(path) = &config.manifest {
        let manifest = Manifest::load(path)
            .with_context(|| format!("load manifest {}", path.display()))?;
        manifest
            .apply(controller.manager())
            .await
            .with_context(|| format!("apply manifest {}", path.display()))?;
    }
    Ok(controller)
}
