//! Cluster role-template binding coordinator (`cluster-crtb-sync`).
use super::Lifecycle;
use crate::model::ClusterRoleTemplateBinding;
use crate::reconcile::{BindingScope, Manager, ReconcileResult};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub struct ClusterBindingLifecycle {
    manager: Manager,
}

impl ClusterBindingLifecycle {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }

    fn is_local(&self, binding: &ClusterRoleTemplateBinding) -> bool {
        binding.cluster_name == self.manager.cluster_name()
    }
}

#[async_trait]
impl Lifecycle<ClusterRoleTemplateBinding> for ClusterBindingLifecycle {
    async fn create(&self, binding: &ClusterRoleTemplateBinding) -> ReconcileResult<()> {
        if !self.is_local(binding) {
            return Ok(());
        }
        sync_cluster_binding(&self.manager, binding).await
    }

    async fn updated(&self, binding: &ClusterRoleTemplateBinding) -> ReconcileResult<()> {
        if !self.is_local(binding) {
            return Ok(());
        }
        sync_cluster_binding(&self.manager, binding).await
    }

    async fn remove(&self, binding: &ClusterRoleTemplateBinding) -> ReconcileResult<()> {
        if !self.is_local(binding) {
            return Ok(());
        }
        self.manager
            .ensure_bindings(&BindingScope::Cluster, &BTreeSet::new(), binding)
            .await?;
        tracing::info!(
            binding = %binding.metadata.name,
            user = %binding.user_name,
            "cluster binding removed"
        );
        Ok(())
    }
}

pub(crate) async fn sync_cluster_binding(
    manager: &Manager,
    binding: &ClusterRoleTemplateBinding,
) -> ReconcileResult<()> {
    if binding.user_name.is_empty() || binding.role_template_name.is_empty() {
        tracing::debug!(
            binding = %binding.metadata.name,
            "cluster binding has no user or role template, clearing its bindings"
        );
        manager
            .ensure_bindings(&BindingScope::Cluster, &BTreeSet::new(), binding)
            .await?;
        return Ok(());
    }
    let resolved = manager.gather_roles(&binding.role_template_name).await?;
    manager.ensure_roles(&resolved).await?;
    let roles: BTreeSet<String> = resolved.into_keys().collect();
    manager
        .ensure_bindings(&BindingScope::Cluster, &roles, binding)
        .await?;
    Ok(())
}
