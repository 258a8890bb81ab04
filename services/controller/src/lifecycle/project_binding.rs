//! Project role-template binding coordinator (`cluster-prtb-sync`).
use super::Lifecycle;
use crate::index::{NS_BY_PROJECT, PRTB_BY_PROJECT_USER, project_user_key};
use crate::model::{BindingDeclaration, Namespace, ProjectRoleTemplateBinding, Resource};
use crate::reconcile::{BindingScope, FirstError, Manager, ReconcileError, ReconcileResult};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub struct ProjectBindingLifecycle {
    manager: Manager,
}

impl ProjectBindingLifecycle {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Lifecycle<ProjectRoleTemplateBinding> for ProjectBindingLifecycle {
    async fn create(&self, binding: &ProjectRoleTemplateBinding) -> ReconcileResult<()> {
        sync_project_binding(&self.manager, binding).await
    }

    async fn updated(&self, binding: &ProjectRoleTemplateBinding) -> ReconcileResult<()> {
        sync_project_binding(&self.manager, binding).await
    }

    async fn remove(&self, binding: &ProjectRoleTemplateBinding) -> ReconcileResult<()> {
        clear_project_binding(&self.manager, binding).await?;
        tracing::info!(
            binding = %binding.metadata.name,
            project = %binding.project_name,
            user = %binding.user_name,
            "project binding removed"
        );
        Ok(())
    }
}

/// Resolve, ensure roles, then converge every namespace the declaration touches.
pub(crate) async fn sync_project_binding(
    manager: &Manager,
    binding: &ProjectRoleTemplateBinding,
) -> ReconcileResult<()> {
    if binding.user_name.is_empty() || binding.role_template_name.is_empty() {
        tracing::debug!(
            binding = %binding.metadata.name,
            "project binding has no user or role template, clearing its bindings"
        );
        return clear_project_binding(manager, binding).await;
    }

    let resolved = manager.gather_roles(&binding.role_template_name).await?;
    manager.ensure_roles(&resolved).await?;
    let roles: BTreeSet<String> = resolved.into_keys().collect();
    warn_on_overlap(manager, binding, &roles).await;

    let members = project_namespaces(manager, &binding.project_name).await?;
    let owned = manager.owned_namespaces(binding.owner_uid()).await?;

    let mut errors = FirstError::default();
    for namespace in &members {
        let scope = BindingScope::Namespace(namespace.clone());
        if let Err(err) = manager.ensure_bindings(&scope, &roles, binding).await {
            errors.record(err);
        }
    }
    // Namespaces that left the project but still carry this declaration's bindings.
    for namespace in owned.difference(&members) {
        let scope = BindingScope::Namespace(namespace.clone());
        if let Err(err) = manager.ensure_bindings(&scope, &BTreeSet::new(), binding).await {
            errors.record(err);
        }
    }
    errors.into_result()
}

/// Drop every binding the declaration owns, in its project and wherever else
/// it left some behind.
async fn clear_project_binding(
    manager: &Manager,
    binding: &ProjectRoleTemplateBinding,
) -> ReconcileResult<()> {
    let mut scopes = manager.owned_namespaces(binding.owner_uid()).await?;
    scopes.extend(project_namespaces(manager, &binding.project_name).await?);

    let mut errors = FirstError::default();
    for namespace in scopes {
        let scope = BindingScope::Namespace(namespace);
        if let Err(err) = manager.ensure_bindings(&scope, &BTreeSet::new(), binding).await {
            errors.record(err);
        }
    }
    errors.into_result()
}

async fn project_namespaces(manager: &Manager, project_id: &str) -> ReconcileResult<BTreeSet<String>> {
    if project_id.is_empty() {
        return Ok(BTreeSet::new());
    }
    let namespaces = manager
        .bounded(manager.store().namespaces().by_index(NS_BY_PROJECT, project_id))
        .await
        .map_err(|err| ReconcileError::store("list", Namespace::KIND, project_id, "cluster", err))?;
    Ok(namespaces
        .into_iter()
        .map(|namespace| namespace.metadata.name)
        .collect())
}

// Overlapping declarations share binding objects; whichever writes last owns them.
async fn warn_on_overlap(manager: &Manager, binding: &ProjectRoleTemplateBinding, roles: &BTreeSet<String>) {
    let key = project_user_key(&binding.project_name, &binding.user_name);
    let peers = match manager
        .bounded(
            manager
                .store()
                .project_bindings()
                .by_index(PRTB_BY_PROJECT_USER, &key),
        )
        .await
    {
        Ok(peers) => peers,
        Err(err) => {
            tracing::debug!(binding = %binding.metadata.name, error = %err, "overlap check skipped");
            return;
        }
    };
    for peer in peers
        .iter()
        .filter(|peer| peer.metadata.uid != binding.metadata.uid)
    {
        let Ok(peer_roles) = manager.gather_roles(&peer.role_template_name).await else {
            continue;
        };
        let shared: Vec<&String> = peer_roles.keys().filter(|role| roles.contains(*role)).collect();
        if !shared.is_empty() {
            tracing::warn!(
                binding = %binding.metadata.name,
                peer = %peer.metadata.name,
                user = %binding.user_name,
                shared = ?shared,
                "project bindings for the same user overlap; shared bindings follow the last writer"
            );
        }
    }
}
