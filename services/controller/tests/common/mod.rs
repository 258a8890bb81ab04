use controller::config::ControllerConfig;
use controller::model::{
    Namespace, ObjectKey, Project, ProjectRoleTemplateBinding, RoleBinding, RoleTemplate,
};
use controller::reconcile::ownership::owner_of;
use controller::store::memory::InMemoryStore;
use controller::store::{ClusterStore, LabelSelector};
use controller::{Controller, build_controller};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use vesta_authz::PolicyRule;

pub const CLUSTER: &str = "local";

pub async fn controller_over(store: Arc<dyn ClusterStore>, config: ControllerConfig) -> Controller {
    build_controller(store, &config).await.expect("controller")
}

pub async fn fixture() -> (Arc<InMemoryStore>, Controller) {
    let store = Arc::new(InMemoryStore::default());
    let controller = controller_over(store.clone(), ControllerConfig::default()).await;
    (store, controller)
}

/// `member` inherits `edit`, which inherits `view`.
pub async fn seed_templates(store: &dyn ClusterStore) {
    let templates = [
        RoleTemplate::new("view", vec![PolicyRule::new(["get", "list"], ["pods"])]),
        RoleTemplate::new("edit", vec![PolicyRule::new(["create", "update"], ["pods"])])
            .inheriting(["view"]),
        RoleTemplate::new("member", Vec::new()).inheriting(["edit"]),
    ];
    for template in templates {
        store.role_templates().create(template).await.expect("template");
    }
}

/// Creates the project and one namespace per name inside it; returns the project id.
pub async fn seed_project(store: &dyn ClusterStore, project: &str, namespaces: &[&str]) -> String {
    let project = store
        .projects()
        .create(Project::new(CLUSTER, project))
        .await
        .expect("project");
    let project_id = project.project_id();
    for name in namespaces {
        store
            .namespaces()
            .create(Namespace::in_project(*name, project_id.as_str()))
            .await
            .expect("namespace");
    }
    project_id
}

pub async fn declare(
    store: &dyn ClusterStore,
    name: &str,
    project_id: &str,
    user: &str,
    template: &str,
) -> ProjectRoleTemplateBinding {
    store
        .project_bindings()
        .create(ProjectRoleTemplateBinding::new(name, project_id, user, template))
        .await
        .expect("declaration")
}

/// Binding name to owner uid for every tagged binding in `namespace`.
pub async fn bindings_in(store: &dyn ClusterStore, namespace: &str) -> BTreeMap<String, String> {
    store
        .role_bindings()
        .list(Some(namespace), &LabelSelector::everything())
        .await
        .expect("list bindings")
        .into_iter()
        .map(|binding: RoleBinding| {
            let owner = owner_of(&binding.metadata).unwrap_or_default().to_string();
            (binding.metadata.name, owner)
        })
        .collect()
}

pub async fn role_names(store: &dyn ClusterStore) -> BTreeSet<String> {
    store
        .cluster_roles()
        .list(None, &LabelSelector::everything())
        .await
        .expect("list roles")
        .into_iter()
        .map(|role| role.metadata.name)
        .collect()
}

pub async fn settle(controller: &Controller) {
    let report = controller.settle(8).await;
    assert_eq!(report.pending, 0, "events left pending: {report:?}");
    assert_eq!(report.abandoned, 0, "events abandoned: {report:?}");
}

pub fn namespace_key(name: &str) -> ObjectKey {
    ObjectKey::cluster(name)
}
