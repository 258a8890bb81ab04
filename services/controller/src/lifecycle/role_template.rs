//! Role-template coordinator (`cluster-roletemplate-sync`).
//!
//! There are no reverse inheritance edges, so a template change finds its
//! dependents by resolving every declaration of this cluster and checking
//! whether the result contains the template.
use super::{Lifecycle, sync_cluster_binding, sync_project_binding};
use crate::index::CRTB_BY_CLUSTER;
use crate::model::{
    ClusterRole, ClusterRoleTemplateBinding, ObjectKey, ProjectRoleTemplateBinding, Resource,
    RoleTemplate,
};
use crate::reconcile::{FirstError, Manager, ReconcileError, ReconcileResult};
use crate::store::LabelSelector;
use async_trait::async_trait;

pub struct RoleTemplateLifecycle {
    manager: Manager,
}

impl RoleTemplateLifecycle {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }

    async fn sync(&self, template: &RoleTemplate) -> ReconcileResult<()> {
        let name = template.metadata.name.as_str();
        let mut errors = FirstError::default();

        if !template.external {
            let existing = self
                .manager
                .bounded(self.manager.store().cluster_roles().find(&ObjectKey::cluster(name)))
                .await
                .map_err(|err| ReconcileError::store("get", ClusterRole::KIND, name, "cluster", err))?;
            if existing.is_some() {
                if let Err(err) = self.manager.ensure_role(template).await {
                    errors.record(err);
                }
            }
        }

        for binding in self.project_bindings().await? {
            if !self.depends_on(&binding.role_template_name, name).await {
                continue;
            }
            tracing::debug!(template = name, binding = %binding.metadata.name, "re-syncing dependent project binding");
            if let Err(err) = sync_project_binding(&self.manager, &binding).await {
                errors.record(err);
            }
        }

        for binding in self.cluster_bindings().await? {
            if !self.depends_on(&binding.role_template_name, name).await {
                continue;
            }
            tracing::debug!(template = name, binding = %binding.metadata.name, "re-syncing dependent cluster binding");
            if let Err(err) = sync_cluster_binding(&self.manager, &binding).await {
                errors.record(err);
            }
        }
        errors.into_result()
    }

    async fn depends_on(&self, root: &str, template: &str) -> bool {
        match self.manager.gather_roles(root).await {
            Ok(resolved) => resolved.contains_key(template),
            Err(err) => {
                tracing::warn!(root, template, error = %err, "skipping binding whose role template does not resolve");
                false
            }
        }
    }

    async fn project_bindings(&self) -> ReconcileResult<Vec<ProjectRoleTemplateBinding>> {
        let cluster = self.manager.cluster_name();
        let all = self
            .manager
            .bounded(
                self.manager
                    .store()
                    .project_bindings()
                    .list(None, &LabelSelector::everything()),
            )
            .await
            .map_err(|err| {
                ReconcileError::store("list", ProjectRoleTemplateBinding::KIND, "all", cluster, err)
            })?;
        // Unprefixed project ids are local, as in every other coordinator.
        Ok(all
            .into_iter()
            .filter(|binding| binding.cluster_name().is_none_or(|c| c == cluster))
            .collect())
    }

    async fn cluster_bindings(&self) -> ReconcileResult<Vec<ClusterRoleTemplateBinding>> {
        let cluster = self.manager.cluster_name();
        self.manager
            .bounded(
                self.manager
                    .store()
                    .cluster_bindings()
                    .by_index(CRTB_BY_CLUSTER, cluster),
            )
            .await
            .map_err(|err| {
                ReconcileError::store("list", ClusterRoleTemplateBinding::KIND, "all", cluster, err)
            })
    }
}

#[async_trait]
impl Lifecycle<RoleTemplate> for RoleTemplateLifecycle {
    async fn create(&self, template: &RoleTemplate) -> ReconcileResult<()> {
        self.sync(template).await
    }

    async fn updated(&self, template: &RoleTemplate) -> ReconcileResult<()> {
        self.sync(template).await
    }

    async fn remove(&self, template: &RoleTemplate) -> ReconcileResult<()> {
        tracing::info!(template = %template.metadata.name, "role template removed, leaving its role in place");
        Ok(())
    }
}
