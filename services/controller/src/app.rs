//! Composition root.
//!
//! Builds the `Manager`, registers indexes, wires each coordinator into the
//! hook registry under its stable name, and owns the watch driver. Nothing is
//! registered globally; everything the controller runs hangs off `Controller`.
use crate::config::ControllerConfig;
use crate::driver::{SyncReport, WatchDriver};
use crate::index::register_indexes;
use crate::lifecycle::{
    CLUSTER_BINDING_HOOK, ClusterBindingLifecycle, Hooks, NAMESPACE_HOOK, NamespaceLifecycle,
    PROJECT_BINDING_HOOK, PROJECT_HOOK, ProjectBindingLifecycle, ProjectLifecycle,
    ROLE_TEMPLATE_HOOK, RoleTemplateLifecycle,
};
use crate::reconcile::Manager;
use crate::store::{ClusterStore, StoreResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Controller {
    manager: Manager,
    hooks: Hooks,
    driver: WatchDriver,
}

pub async fn build_controller(
    store: Arc<dyn ClusterStore>,
    config: &ControllerConfig,
) -> StoreResult<Controller> {
    register_indexes(store.as_ref()).await?;
    let manager = Manager::new(store, config.cluster_name.as_str(), config.store_timeout);
    let cluster = config.cluster_name.as_str();

    let mut hooks = Hooks::default();
    hooks.projects.add_cluster_scoped(
        PROJECT_HOOK,
        cluster,
        Arc::new(ProjectLifecycle::new(manager.clone())),
    );
    hooks.project_bindings.add_cluster_scoped(
        PROJECT_BINDING_HOOK,
        cluster,
        Arc::new(ProjectBindingLifecycle::new(manager.clone())),
    );
    hooks.cluster_bindings.add_cluster_scoped(
        CLUSTER_BINDING_HOOK,
        cluster,
        Arc::new(ClusterBindingLifecycle::new(manager.clone())),
    );
    hooks.role_templates.add_cluster_scoped(
        ROLE_TEMPLATE_HOOK,
        cluster,
        Arc::new(RoleTemplateLifecycle::new(manager.clone())),
    );
    hooks
        .namespaces
        .add(NAMESPACE_HOOK, Arc::new(NamespaceLifecycle::new(manager.clone())));

    let driver = WatchDriver::new(manager.clone(), config.retry_max_attempts);
    tracing::info!(
        cluster,
        backend = manager.store().backend_name(),
        timeout_ms = config.store_timeout.as_millis() as u64,
        "controller wired"
    );
    Ok(Controller {
        manager,
        hooks,
        driver,
    })
}

impl Controller {
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub async fn sync_once(&self) -> SyncReport {
        self.driver.sync_once(&self.hooks).await
    }

    /// Run passes until one finds nothing to do, or `max_passes` is reached.
    /// Returns the totals across all passes run.
    pub async fn settle(&self, max_passes: usize) -> SyncReport {
        let mut total = SyncReport::default();
        for _ in 0..max_passes {
            let report = self.sync_once().await;
            total.delivered += report.delivered;
            total.failed += report.failed;
            total.abandoned += report.abandoned;
            total.dropped += report.dropped;
            total.resnapshots += report.resnapshots;
            total.feed_errors += report.feed_errors;
            total.pending = report.pending;
            if report.is_idle() {
                break;
            }
        }
        total
    }

    /// Poll every `interval` until `shutdown` resolves.
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let report = self.sync_once().await;
            if report.failed > 0 || report.abandoned > 0 {
                tracing::warn!(
                    failed = report.failed,
                    abandoned = report.abandoned,
                    pending = report.pending,
                    "sync pass finished with failures"
                );
            } else if report.delivered > 0 {
                tracing::debug!(delivered = report.delivered, "sync pass finished");
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("controller stopped");
    }
}
