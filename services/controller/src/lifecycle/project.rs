//! Project coordinator (`project-namespace-auth`).
//!
//! Projects carry no grants themselves; a project event only re-converges the
//! namespaces annotated with it.
use super::{Lifecycle, reconcile_namespace};
use crate::index::NS_BY_PROJECT;
use crate::model::{Namespace, Project, Resource};
use crate::reconcile::{FirstError, Manager, ReconcileError, ReconcileResult};
use async_trait::async_trait;

pub struct ProjectLifecycle {
    manager: Manager,
}

impl ProjectLifecycle {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }

    async fn sync_members(&self, project: &Project) -> ReconcileResult<()> {
        let project_id = project.project_id();
        let members = self
            .manager
            .bounded(
                self.manager
                    .store()
                    .namespaces()
                    .by_index(NS_BY_PROJECT, &project_id),
            )
            .await
            .map_err(|err| ReconcileError::store("list", Namespace::KIND, &project_id, "cluster", err))?;

        let mut errors = FirstError::default();
        for namespace in &members {
            if let Err(err) = reconcile_namespace(&self.manager, namespace).await {
                errors.record(err);
            }
        }
        tracing::debug!(project = %project_id, namespaces = members.len(), "synchronized project namespaces");
        errors.into_result()
    }
}

#[async_trait]
impl Lifecycle<Project> for ProjectLifecycle {
    async fn create(&self, project: &Project) -> ReconcileResult<()> {
        self.sync_members(project).await
    }

    async fn updated(&self, project: &Project) -> ReconcileResult<()> {
        self.sync_members(project).await
    }

    async fn remove(&self, project: &Project) -> ReconcileResult<()> {
        tracing::info!(project = %project.project_id(), "project removed");
        Ok(())
    }
}
