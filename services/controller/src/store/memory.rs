//! In-memory implementation of the cluster store.
//!
//! # Purpose
//! Backs every kind with a `MemoryCollection`: authoritative items in an
//! `IndexedMap` plus a bounded change log, both behind one `tokio::sync::RwLock`
//! so a write and its change-log entry are sequenced together. Used by the
//! binary (seeded from a manifest) and by tests.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Per-kind consistency**: each collection serializes its own writes; there
//!   is no ordering across kinds.
//!
//! # Change streams
//! Each collection keeps its own sequence. When the retention window
//! (`StoreConfig::change_window`) overflows, old changes are evicted and
//! consumers that fell behind must re-bootstrap via `snapshot()`.
//!
//! # Metrics
//! `vesta_objects_total{kind}` tracks the item count of each collection.
use super::{ChangeSet, ClusterStore, LabelSelector, ObjectStore, Snapshot, StoreConfig};
use super::{StoreError, StoreResult};
use crate::model::{
    Change, ChangeOp, ClusterRole, ClusterRoleTemplateBinding, Namespace, ObjectKey, Project,
    ProjectRoleTemplateBinding, Resource, RoleBinding, RoleTemplate,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use vesta_index::{IndexFunc, IndexedMap};

/// Bounded append-only log of changes for one kind.
#[derive(Debug)]
struct ChangeLog<T> {
    next_seq: u64,
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> ChangeLog<T> {
    fn new(capacity: usize) -> Self {
        Self {
            next_seq: 0,
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    fn record(&mut self, item: impl FnOnce(u64) -> T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(item(seq));
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        seq
    }
}

struct CollectionState<T> {
    items: IndexedMap<T>,
    changes: ChangeLog<Change<T>>,
    // Resource versions are per collection and never reused.
    next_version: u64,
}

pub struct MemoryCollection<T> {
    changes_limit: usize,
    state: RwLock<CollectionState<T>>,
}

impl<T: Resource> MemoryCollection<T> {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            changes_limit: config.changes_limit as usize,
            state: RwLock::new(CollectionState {
                items: IndexedMap::new(),
                changes: ChangeLog::new(config.change_window()),
                next_version: 1,
            }),
        }
    }

    fn describe(key: &ObjectKey) -> String {
        format!("{} {key}", T::KIND)
    }

    fn report_len(state: &CollectionState<T>) {
        metrics::gauge!("vesta_objects_total", "kind" => T::KIND).set(state.items.len() as f64);
    }
}

fn record_change<T: Resource>(state: &mut CollectionState<T>, op: ChangeOp, object: &T) {
    let key = object.key();
    state.changes.record(|seq| Change {
        seq,
        op,
        key,
        object: object.clone(),
    });
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for MemoryCollection<T> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<T> {
        self.state
            .read()
            .await
            .items
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(Self::describe(key)))
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<T>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|item| match namespace {
                Some(ns) => item.metadata().namespace.as_deref() == Some(ns),
                None => true,
            })
            .filter(|item| selector.matches(&item.metadata().labels))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: T) -> StoreResult<T> {
        let key = object.key();
        let mut state = self.state.write().await;
        if state.items.contains_key(&key.to_string()) {
            return Err(StoreError::AlreadyExists(Self::describe(&key)));
        }
        let version = state.next_version;
        state.next_version += 1;
        let meta = object.metadata_mut();
        if meta.uid.is_empty() {
            meta.uid = uuid::Uuid::new_v4().to_string();
        }
        meta.resource_version = version;
        state.items.insert(key.to_string(), object.clone());
        record_change(&mut state, ChangeOp::Created, &object);
        Self::report_len(&state);
        Ok(object)
    }

    async fn update(&self, mut object: T) -> StoreResult<T> {
        let key = object.key();
        let mut state = self.state.write().await;
        let (stored_version, stored_uid) = match state.items.get(&key.to_string()) {
            Some(stored) => (
                stored.metadata().resource_version,
                stored.metadata().uid.clone(),
            ),
            None => return Err(StoreError::NotFound(Self::describe(&key))),
        };
        if object.metadata().resource_version != stored_version {
            return Err(StoreError::Conflict(format!(
                "{} has resource version {stored_version}, update carried {}",
                Self::describe(&key),
                object.metadata().resource_version
            )));
        }
        let version = state.next_version;
        state.next_version += 1;
        let meta = object.metadata_mut();
        meta.uid = stored_uid;
        meta.resource_version = version;
        state.items.insert(key.to_string(), object.clone());
        record_change(&mut state, ChangeOp::Updated, &object);
        Ok(object)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<T> {
        let mut state = self.state.write().await;
        let removed = state
            .items
            .remove(&key.to_string())
            .ok_or_else(|| StoreError::NotFound(Self::describe(key)))?;
        record_change(&mut state, ChangeOp::Deleted, &removed);
        Self::report_len(&state);
        Ok(removed)
    }

    async fn add_index(&self, name: &str, func: IndexFunc<T>) -> StoreResult<()> {
        Ok(self.state.write().await.items.add_index(name, func)?)
    }

    async fn by_index(&self, name: &str, value: &str) -> StoreResult<Vec<T>> {
        let state = self.state.read().await;
        Ok(state
            .items
            .by_index(name, value)?
            .into_iter()
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> StoreResult<Snapshot<T>> {
        // `next_seq` is the checkpoint a consumer should use as `since` on its first changes poll.
        let state = self.state.read().await;
        Ok(Snapshot {
            items: state.items.values().cloned().collect(),
            next_seq: state.changes.next_seq,
        })
    }

    async fn changes(&self, since: u64) -> StoreResult<ChangeSet<Change<T>>> {
        let state = self.state.read().await;
        let items: Vec<Change<T>> = state
            .changes
            .items
            .iter()
            .filter(|item| item.seq >= since)
            .take(self.changes_limit)
            .cloned()
            .collect();
        // A full page may not reach the head of the log; resume right after it.
        let next_seq = match items.last() {
            Some(last) if items.len() == self.changes_limit => last.seq + 1,
            _ => state.changes.next_seq,
        };
        Ok(ChangeSet { items, next_seq })
    }
}

/// In-memory cluster store with one collection per kind.
pub struct InMemoryStore {
    role_templates: MemoryCollection<RoleTemplate>,
    projects: MemoryCollection<Project>,
    namespaces: MemoryCollection<Namespace>,
    project_bindings: MemoryCollection<ProjectRoleTemplateBinding>,
    cluster_bindings: MemoryCollection<ClusterRoleTemplateBinding>,
    cluster_roles: MemoryCollection<ClusterRole>,
    role_bindings: MemoryCollection<RoleBinding>,
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            role_templates: MemoryCollection::new(&config),
            projects: MemoryCollection::new(&config),
            namespaces: MemoryCollection::new(&config),
            project_bindings: MemoryCollection::new(&config),
            cluster_bindings: MemoryCollection::new(&config),
            cluster_roles: MemoryCollection::new(&config),
            role_bindings: MemoryCollection::new(&config),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl ClusterStore for InMemoryStore {
    fn role_templates(&self) -> &dyn ObjectStore<RoleTemplate> {
        &self.role_templates
    }

    fn projects(&self) -> &dyn ObjectStore<Project> {
        &self.projects
    }

    fn namespaces(&self) -> &dyn ObjectStore<Namespace> {
        &self.namespaces
    }

    fn project_bindings(&self) -> &dyn ObjectStore<ProjectRoleTemplateBinding> {
        &self.project_bindings
    }

    fn cluster_bindings(&self) -> &dyn ObjectStore<ClusterRoleTemplateBinding> {
        &self.cluster_bindings
    }

    fn cluster_roles(&self) -> &dyn ObjectStore<ClusterRole> {
        &self.cluster_roles
    }

    fn role_bindings(&self) -> &dyn ObjectStore<RoleBinding> {
        &self.role_bindings
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store_with_limits(changes_limit: u64, retention: i64) -> InMemoryStore {
        InMemoryStore::new(StoreConfig {
            changes_limit,
            change_retention_max_rows: Some(retention),
        })
    }

    #[tokio::test]
    async fn create_assigns_uid_and_rejects_duplicates() {
        let store = store_with_limits(10, 10);
        let created = store
            .namespaces()
            .create(Namespace::new("team-a"))
            .await
            .expect("create");
        assert!(!created.metadata.uid.is_empty());
        assert!(created.metadata.resource_version > 0);

        let err = store
            .namespaces()
            .create(Namespace::new("team-a"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_requires_current_resource_version() {
        let store = store_with_limits(10, 10);
        let role = store
            .cluster_roles()
            .create(ClusterRole::new("view", Vec::new()))
            .await
            .expect("create");

        let updated = store
            .cluster_roles()
            .update(role.clone())
            .await
            .expect("update");
        assert!(updated.metadata.resource_version > role.metadata.resource_version);
        assert_eq!(updated.metadata.uid, role.metadata.uid);

        let err = store
            .cluster_roles()
            .update(role)
            .await
            .expect_err("stale");
        assert!(matches!(err, StoreError::Conflict(_)));

        let missing = ClusterRole::new("edit", Vec::new());
        let err = store
            .cluster_roles()
            .update(missing)
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_returns_object_and_records_it_in_the_feed() {
        let store = store_with_limits(10, 10);
        store
            .projects()
            .create(Project::new("local", "p-web"))
            .await
            .expect("create");
        let removed = store
            .projects()
            .delete(&ObjectKey::cluster("p-web"))
            .await
            .expect("delete");
        assert_eq!(removed.cluster_name, "local");

        let changes = store.projects().changes(0).await.expect("changes");
        assert_eq!(changes.items.len(), 2);
        assert_eq!(changes.items[1].op, ChangeOp::Deleted);
        assert_eq!(changes.items[1].object.cluster_name, "local");

        let err = store
            .projects()
            .delete(&ObjectKey::cluster("p-web"))
            .await
            .expect_err("gone");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn change_window_evicts_and_pages() {
        let store = store_with_limits(1, 1);
        for name in ["a", "b", "c"] {
            store
                .namespaces()
                .create(Namespace::new(name))
                .await
                .expect("create");
        }
        let changes = store.namespaces().changes(0).await.expect("changes");
        assert_eq!(changes.items.len(), 1);
        assert_eq!(changes.items[0].key, ObjectKey::cluster("c"));
        assert_eq!(changes.next_seq, 3);

        let store = store_with_limits(2, 10);
        for name in ["a", "b", "c"] {
            store
                .namespaces()
                .create(Namespace::new(name))
                .await
                .expect("create");
        }
        let page = store.namespaces().changes(0).await.expect("page");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_seq, 2);
        let rest = store
            .namespaces()
            .changes(page.next_seq)
            .await
            .expect("rest");
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.next_seq, 3);
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = store_with_limits(10, 10);
        let bindings = store.role_bindings();
        for (ns, name, owner) in [
            (Some("team-a"), "view-alice", "u1"),
            (Some("team-b"), "view-alice", "u2"),
            (None, "admin-bob", "u1"),
        ] {
            let mut meta = match ns {
                Some(ns) => crate::model::ObjectMeta::namespaced(ns, name),
                None => crate::model::ObjectMeta::named(name),
            };
            meta = meta.with_label("owner", owner);
            bindings
                .create(RoleBinding {
                    metadata: meta,
                    subjects: Vec::new(),
                    role_ref: vesta_authz::RoleRef::cluster_role("view"),
                })
                .await
                .expect("create");
        }

        let owned = bindings
            .list(None, &LabelSelector::everything().with_value("owner", "u1"))
            .await
            .expect("list");
        assert_eq!(owned.len(), 2);

        let team_a = bindings
            .list(Some("team-a"), &LabelSelector::everything())
            .await
            .expect("list");
        assert_eq!(team_a.len(), 1);
        assert_eq!(team_a[0].metadata.labels["owner"], "u1");
    }

    #[tokio::test]
    async fn indexes_follow_writes() {
        let store = store_with_limits(10, 10);
        let namespaces = store.namespaces();
        namespaces
            .add_index(
                "by-project",
                Arc::new(|ns: &Namespace| ns.project_id().map(str::to_string).into_iter().collect()),
            )
            .await
            .expect("index");
        namespaces
            .create(Namespace::in_project("web", "local:p1"))
            .await
            .expect("create");
        let found = namespaces.by_index("by-project", "local:p1").await.expect("lookup");
        assert_eq!(found.len(), 1);

        let mut moved = found[0].clone();
        moved
            .metadata
            .annotations
            .insert(crate::model::PROJECT_ID_ANNOTATION.to_string(), "local:p2".to_string());
        namespaces.update(moved).await.expect("update");
        assert!(
            namespaces
                .by_index("by-project", "local:p1")
                .await
                .expect("lookup")
                .is_empty()
        );

        let err = namespaces.by_index("nope", "x").await.expect_err("unknown");
        assert!(matches!(err, StoreError::UnknownIndex(_)));
    }
}
