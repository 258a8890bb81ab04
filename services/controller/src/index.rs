//! Secondary lookups the reconciler relies on.
//!
//! Every lookup here replaces a full scan: declarations by project, by
//! project+user, and by cluster; namespaces by project annotation; low-level
//! bindings by owner tag.
use crate::model::{
    ClusterRoleTemplateBinding, Namespace, ProjectRoleTemplateBinding, RoleBinding,
};
use crate::reconcile::ownership;
use crate::store::{ClusterStore, StoreResult};
use std::sync::Arc;

pub const PRTB_BY_PROJECT: &str = "authz.vesta.io/prtb-by-project";
pub const PRTB_BY_PROJECT_USER: &str = "authz.vesta.io/prtb-by-project-user";
pub const CRTB_BY_CLUSTER: &str = "authz.vesta.io/crtb-by-cluster";
pub const NS_BY_PROJECT: &str = "authz.vesta.io/ns-by-project";
pub const ROLE_BINDING_BY_OWNER: &str = "authz.vesta.io/rb-by-owner";

pub fn project_user_key(project_name: &str, user_name: &str) -> String {
    format!("{project_name}.{user_name}")
}

fn prtb_by_project(binding: &ProjectRoleTemplateBinding) -> Vec<String> {
    if binding.project_name.is_empty() {
        return Vec::new();
    }
    vec![binding.project_name.clone()]
}

fn prtb_by_project_user(binding: &ProjectRoleTemplateBinding) -> Vec<String> {
    if binding.project_name.is_empty() || binding.user_name.is_empty() {
        return Vec::new();
    }
    vec![project_user_key(&binding.project_name, &binding.user_name)]
}

fn crtb_by_cluster(binding: &ClusterRoleTemplateBinding) -> Vec<String> {
    if binding.cluster_name.is_empty() {
        return Vec::new();
    }
    vec![binding.cluster_name.clone()]
}

fn ns_by_project(namespace: &Namespace) -> Vec<String> {
    namespace
        .project_id()
        .map(str::to_string)
        .into_iter()
        .collect()
}

fn role_binding_by_owner(binding: &RoleBinding) -> Vec<String> {
    ownership::owner_of(&binding.metadata)
        .map(str::to_string)
        .into_iter()
        .collect()
}

/// Register every index on `store`. Called once by the composition root.
pub async fn register_indexes(store: &dyn ClusterStore) -> StoreResult<()> {
    let bindings = store.project_bindings();
    bindings
        .add_index(PRTB_BY_PROJECT, Arc::new(prtb_by_project))
        .await?;
    bindings
        .add_index(PRTB_BY_PROJECT_USER, Arc::new(prtb_by_project_user))
        .await?;
    store
        .cluster_bindings()
        .add_index(CRTB_BY_CLUSTER, Arc::new(crtb_by_cluster))
        .await?;
    store
        .namespaces()
        .add_index(NS_BY_PROJECT, Arc::new(ns_by_project))
        .await?;
    store
        .role_bindings()
        .add_index(ROLE_BINDING_BY_OWNER, Arc::new(role_binding_by_owner))
        .await?;
    tracing::debug!(backend = store.backend_name(), "registered secondary indexes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn project_user_index_joins_project_and_user() {
        let store = InMemoryStore::default();
        register_indexes(&store).await.expect("indexes");
        store
            .project_bindings()
            .create(ProjectRoleTemplateBinding::new("b1", "local:p1", "alice", "view"))
            .await
            .expect("create");

        let hits = store
            .project_bindings()
            .by_index(PRTB_BY_PROJECT_USER, &project_user_key("local:p1", "alice"))
            .await
            .expect("lookup");
        assert_eq!(hits.len(), 1);
        assert!(
            store
                .project_bindings()
                .by_index(PRTB_BY_PROJECT, "local:p2")
                .await
                .expect("lookup")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn registering_twice_is_rejected() {
        let store = InMemoryStore::default();
        register_indexes(&store).await.expect("indexes");
        let err = register_indexes(&store).await.expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
