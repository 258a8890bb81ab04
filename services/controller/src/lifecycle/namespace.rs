//! Namespace coordinator (`namespace-auth`).
//!
//! A namespace's owner-tagged bindings must match the project-scoped
//! declarations of the project its annotation names. Moving a namespace
//! between projects, or dropping the annotation, removes the bindings of
//! declarations that no longer apply.
use super::Lifecycle;
use crate::index::PRTB_BY_PROJECT;
use crate::model::{BindingDeclaration, Namespace, ProjectRoleTemplateBinding, Resource};
use crate::reconcile::{BindingScope, FirstError, Manager, ReconcileError, ReconcileResult};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub struct NamespaceLifecycle {
    manager: Manager,
}

impl NamespaceLifecycle {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Lifecycle<Namespace> for NamespaceLifecycle {
    async fn create(&self, namespace: &Namespace) -> ReconcileResult<()> {
        reconcile_namespace(&self.manager, namespace).await
    }

    async fn updated(&self, namespace: &Namespace) -> ReconcileResult<()> {
        reconcile_namespace(&self.manager, namespace).await
    }

    async fn remove(&self, namespace: &Namespace) -> ReconcileResult<()> {
        let removed = self
            .manager
            .purge_bindings(&namespace.metadata.name, &BTreeSet::new())
            .await?;
        tracing::info!(
            namespace = %namespace.metadata.name,
            removed = removed.len(),
            "namespace removed, cleared its bindings"
        );
        Ok(())
    }
}

/// Bring every owner-tagged binding in `namespace` in line with its project.
///
/// Declarations that fail to resolve keep whatever bindings they already
/// have; the failure is still returned so the event is redelivered.
pub(crate) async fn reconcile_namespace(manager: &Manager, namespace: &Namespace) -> ReconcileResult<()> {
    let name = namespace.metadata.name.as_str();
    let scope = BindingScope::Namespace(name.to_string());
    let mut keep = BTreeSet::new();
    let mut errors = FirstError::default();

    if let Some(project_id) = namespace.project_id() {
        let declarations = manager
            .bounded(
                manager
                    .store()
                    .project_bindings()
                    .by_index(PRTB_BY_PROJECT, project_id),
            )
            .await
            .map_err(|err| {
                ReconcileError::store(
                    "list",
                    ProjectRoleTemplateBinding::KIND,
                    project_id,
                    scope.to_string(),
                    err,
                )
            })?;

        for declaration in &declarations {
            keep.insert(declaration.owner_uid().to_string());
            let resolved = match manager.gather_roles(&declaration.role_template_name).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracing::warn!(
                        namespace = name,
                        binding = %declaration.metadata.name,
                        error = %err,
                        "cannot resolve role template, keeping existing bindings"
                    );
                    errors.record(err);
                    continue;
                }
            };
            if let Err(err) = manager.ensure_roles(&resolved).await {
                errors.record(err);
                continue;
            }
            let roles: BTreeSet<String> = resolved.into_keys().collect();
            if let Err(err) = manager.ensure_bindings(&scope, &roles, declaration).await {
                errors.record(err);
            }
        }
    }

    match manager.purge_bindings(name, &keep).await {
        Ok(removed) if !removed.is_empty() => {
            tracing::info!(namespace = name, removed = removed.len(), "removed stale bindings");
        }
        Ok(_) => {}
        Err(err) => errors.record(err),
    }
    errors.into_result()
}
