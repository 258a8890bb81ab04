//! Binding synchronizer: desired vs. observed `RoleBinding`s for one owner.
//!
//! # Purpose
//! For one declaration and one scope, computes the bindings that must exist
//! (one per effective role for the declaration's subject), diffs them against
//! the bindings already tagged with the declaration's uid, and applies the
//! minimal create/update/delete set.
//!
//! # Key invariants
//! - Binding names are `lowercase("{role}-{subject}")`; two owners that want
//!   the same name share one object and the last writer's tag wins.
//! - Each write is independent: a failure is logged and remembered, the rest
//!   still run, and the first failure is returned.
//! - `AlreadyExists` on create and `NotFound` on delete are not failures.
use super::ownership::{self, owned_binding, same_grant};
use super::{FirstError, Manager, ReconcileError, ReconcileResult};
use crate::index::ROLE_BINDING_BY_OWNER;
use crate::model::{BindingDeclaration, ObjectKey, ObjectMeta, Resource, RoleBinding};
use crate::store::StoreError;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

const BINDING_WRITE_ATTEMPTS: usize = 2;

/// Where a declaration's bindings live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingScope {
    Namespace(String),
    Cluster,
}

impl BindingScope {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            BindingScope::Namespace(namespace) => Some(namespace),
            BindingScope::Cluster => None,
        }
    }

    pub fn contains(&self, meta: &ObjectMeta) -> bool {
        meta.namespace.as_deref() == self.namespace()
    }
}

impl fmt::Display for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingScope::Namespace(namespace) => write!(f, "namespace {namespace}"),
            BindingScope::Cluster => f.write_str("cluster"),
        }
    }
}

/// Names touched by one `ensure_bindings` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingDiff {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl BindingDiff {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

impl Manager {
    /// Converge the bindings `owner` has in `scope` to one per name in `role_names`.
    ///
    /// An empty `role_names` removes everything `owner` has in `scope`.
    pub async fn ensure_bindings<D>(
        &self,
        scope: &BindingScope,
        role_names: &BTreeSet<String>,
        owner: &D,
    ) -> ReconcileResult<BindingDiff>
    where
        D: BindingDeclaration + ?Sized,
    {
        let owner_uid = owner.owner_uid();
        let subject = owner.subject();
        let mut desired: BTreeMap<String, RoleBinding> = role_names
            .iter()
            .map(|role| {
                let binding = owned_binding(scope, role, &subject, owner_uid);
                (binding.metadata.name.clone(), binding)
            })
            .collect();

        let observed = self.owned_bindings(owner_uid, scope).await?;

        let mut diff = BindingDiff::default();
        let mut errors = FirstError::default();
        let mut processed = HashSet::new();
        let mut to_delete = Vec::new();
        for binding in observed {
            if !processed.insert(binding.metadata.name.clone()) {
                continue;
            }
            match desired.remove(&binding.metadata.name) {
                Some(want) if same_grant(&binding, &want) => {
                    diff.unchanged.push(binding.metadata.name);
                }
                Some(want) => match self.overwrite_binding(scope, binding, want).await {
                    Ok(name) => diff.updated.push(name),
                    Err(err) => errors.record(err),
                },
                None => to_delete.push(binding),
            }
        }

        for (name, want) in desired {
            match self.create_binding(scope, want).await {
                Ok(BindingWrite::Created) => diff.created.push(name),
                Ok(BindingWrite::Updated) => diff.updated.push(name),
                Ok(BindingWrite::Unchanged) => diff.unchanged.push(name),
                Err(err) => errors.record(err),
            }
        }

        for binding in to_delete {
            match self.delete_binding(scope, &binding).await {
                Ok(()) => diff.deleted.push(binding.metadata.name),
                Err(err) => errors.record(err),
            }
        }

        if !diff.is_noop() {
            tracing::info!(
                owner = owner_uid,
                user = owner.user_name(),
                %scope,
                created = diff.created.len(),
                updated = diff.updated.len(),
                deleted = diff.deleted.len(),
                "reconciled bindings"
            );
        }
        errors.into_result().map(|()| diff)
    }

    /// Namespaces in which `owner_uid` currently has bindings.
    pub async fn owned_namespaces(&self, owner_uid: &str) -> ReconcileResult<BTreeSet<String>> {
        let bindings = self
            .bounded(
                self.store()
                    .role_bindings()
                    .by_index(ROLE_BINDING_BY_OWNER, owner_uid),
            )
            .await
            .map_err(|err| ReconcileError::store("list", RoleBinding::KIND, owner_uid, "all namespaces", err))?;
        Ok(bindings
            .into_iter()
            .filter_map(|binding| binding.metadata.namespace)
            .collect())
    }

    /// Delete owner-tagged bindings in `namespace` whose owner is not in `keep`.
    ///
    /// Untagged bindings are never touched.
    pub async fn purge_bindings(
        &self,
        namespace: &str,
        keep: &BTreeSet<String>,
    ) -> ReconcileResult<Vec<String>> {
        let scope = BindingScope::Namespace(namespace.to_string());
        let tagged = self
            .bounded(
                self.store()
                    .role_bindings()
                    .list(Some(namespace), &ownership::owned_selector()),
            )
            .await
            .map_err(|err| ReconcileError::store("list", RoleBinding::KIND, "owned", scope.to_string(), err))?;

        let mut deleted = Vec::new();
        let mut errors = FirstError::default();
        for binding in tagged {
            let Some(owner) = ownership::owner_of(&binding.metadata) else {
                continue;
            };
            if keep.contains(owner) {
                continue;
            }
            tracing::info!(
                namespace,
                binding = %binding.metadata.name,
                owner,
                "removing binding of a declaration no longer bound here"
            );
            match self.delete_binding(&scope, &binding).await {
                Ok(()) => deleted.push(binding.metadata.name),
                Err(err) => errors.record(err),
            }
        }
        errors.into_result().map(|()| deleted)
    }

    async fn owned_bindings(&self, owner_uid: &str, scope: &BindingScope) -> ReconcileResult<Vec<RoleBinding>> {
        let mut bindings = self
            .bounded(
                self.store()
                    .role_bindings()
                    .by_index(ROLE_BINDING_BY_OWNER, owner_uid),
            )
            .await
            .map_err(|err| ReconcileError::store("list", RoleBinding::KIND, owner_uid, scope.to_string(), err))?;
        bindings.retain(|binding| scope.contains(&binding.metadata));
        Ok(bindings)
    }

    async fn create_binding(&self, scope: &BindingScope, want: RoleBinding) -> ReconcileResult<BindingWrite> {
        let store = self.store().role_bindings();
        let key = want.key();
        match self.bounded(store.create(want.clone())).await {
            Ok(_) => {
                metrics::counter!("vesta_bindings_created_total").increment(1);
                Ok(BindingWrite::Created)
            }
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self
                    .bounded(store.find(&key))
                    .await
                    .map_err(|err| binding_error("get", &key, scope, err))?;
                match existing {
                    Some(existing) if same_grant(&existing, &want) => Ok(BindingWrite::Unchanged),
                    Some(existing) => {
                        tracing::warn!(
                            binding = %key,
                            previous_owner = ownership::owner_of(&existing.metadata).unwrap_or(""),
                            owner = ownership::owner_of(&want.metadata).unwrap_or(""),
                            "binding name shared by another owner, taking it over"
                        );
                        self.overwrite_binding(scope, existing, want)
                            .await
                            .map(|_| BindingWrite::Updated)
                    }
                    // Deleted between the create and the read; the next pass recreates it.
                    None => Err(binding_error(
                        "create",
                        &key,
                        scope,
                        StoreError::Conflict(format!("{key} vanished while being created")),
                    )),
                }
            }
            Err(err) => {
                tracing::warn!(binding = %key, %scope, error = %err, "binding create failed");
                Err(binding_error("create", &key, scope, err))
            }
        }
    }

    /// Rewrite `existing` to carry `want`'s grant and owner tag.
    ///
    /// A conflicting update is re-read and retried once; a re-read that
    /// already matches counts as written.
    async fn overwrite_binding(
        &self,
        scope: &BindingScope,
        mut existing: RoleBinding,
        want: RoleBinding,
    ) -> ReconcileResult<String> {
        let store = self.store().role_bindings();
        let key = existing.key();
        for attempt in 1..=BINDING_WRITE_ATTEMPTS {
            if let Some(owner) = ownership::owner_of(&want.metadata) {
                ownership::set_owner(&mut existing.metadata, owner);
            }
            existing.subjects = want.subjects.clone();
            existing.role_ref = want.role_ref.clone();
            match self.bounded(store.update(existing)).await {
                Ok(updated) => return Ok(updated.metadata.name),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(binding = %key, %scope, attempt, "binding update conflicted, re-reading");
                    let current = self
                        .bounded(store.find(&key))
                        .await
                        .map_err(|err| binding_error("get", &key, scope, err))?;
                    existing = match current {
                        Some(current) if same_grant(&current, &want) => return Ok(current.metadata.name),
                        Some(current) => current,
                        None => {
                            return Err(binding_error(
                                "update",
                                &key,
                                scope,
                                StoreError::Conflict(format!("{key} vanished while being updated")),
                            ));
                        }
                    };
                }
                Err(err) => {
                    tracing::warn!(binding = %key, %scope, error = %err, "binding update failed");
                    return Err(binding_error("update", &key, scope, err));
                }
            }
        }

        tracing::warn!(binding = %key, %scope, "binding update kept conflicting");
        Err(ReconcileError::Conflict {
            kind: RoleBinding::KIND,
            name: key.name,
        })
    }

    async fn delete_binding(&self, scope: &BindingScope, binding: &RoleBinding) -> ReconcileResult<()> {
        let key = binding.key();
        match self.bounded(self.store().role_bindings().delete(&key)).await {
            Ok(_) => {
                metrics::counter!("vesta_bindings_deleted_total").increment(1);
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => {
                tracing::warn!(binding = %key, %scope, error = %err, "binding delete failed");
                Err(binding_error("delete", &key, scope, err))
            }
        }
    }
}

enum BindingWrite {
    Created,
    Updated,
    Unchanged,
}

fn binding_error(action: &'static str, key: &ObjectKey, scope: &BindingScope, err: StoreError) -> ReconcileError {
    ReconcileError::store(action, RoleBinding::KIND, key.name.clone(), scope.to_string(), err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::register_indexes;
    use crate::model::{
        Change, ClusterRole, ClusterRoleTemplateBinding, Namespace, Project,
        ProjectRoleTemplateBinding, RoleTemplate,
    };
    use crate::store::memory::{InMemoryStore, MemoryCollection};
    use crate::store::{
        ChangeSet, ClusterStore, LabelSelector, ObjectStore, Snapshot, StoreConfig, StoreResult,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vesta_authz::Subject;
    use vesta_index::IndexFunc;

    async fn setup() -> (Arc<InMemoryStore>, Manager) {
        let store = Arc::new(InMemoryStore::default());
        register_indexes(store.as_ref()).await.expect("indexes");
        let manager = Manager::new(store.clone(), "local", Duration::from_secs(1));
        (store, manager)
    }

    fn declaration(uid: &str, user: &str) -> ProjectRoleTemplateBinding {
        let mut binding = ProjectRoleTemplateBinding::new(uid, "local:p1", user, "member");
        binding.metadata.uid = uid.to_string();
        binding
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    /// Role bindings where another writer gets in right before each of the
    /// next `races` updates.
    struct RacingBindings {
        inner: MemoryCollection<RoleBinding>,
        races: AtomicUsize,
    }

    impl RacingBindings {
        async fn race(&self, key: &ObjectKey) {
            if self.races.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.races.fetch_sub(1, Ordering::SeqCst);
            let mut current = self.inner.get(key).await.expect("racing read");
            current.subjects.push(Subject::user("eve"));
            self.inner.update(current).await.expect("racing write");
        }
    }

    #[async_trait]
    impl ObjectStore<RoleBinding> for RacingBindings {
        async fn get(&self, key: &ObjectKey) -> StoreResult<RoleBinding> {
            self.inner.get(key).await
        }

        async fn list(
            &self,
            namespace: Option<&str>,
            selector: &LabelSelector,
        ) -> StoreResult<Vec<RoleBinding>> {
            self.inner.list(namespace, selector).await
        }

        async fn create(&self, object: RoleBinding) -> StoreResult<RoleBinding> {
            self.inner.create(object).await
        }

        async fn update(&self, object: RoleBinding) -> StoreResult<RoleBinding> {
            self.race(&object.key()).await;
            self.inner.update(object).await
        }

        async fn delete(&self, key: &ObjectKey) -> StoreResult<RoleBinding> {
            self.inner.delete(key).await
        }

        async fn add_index(&self, name: &str, func: IndexFunc<RoleBinding>) -> StoreResult<()> {
            self.inner.add_index(name, func).await
        }

        async fn by_index(&self, name: &str, value: &str) -> StoreResult<Vec<RoleBinding>> {
            self.inner.by_index(name, value).await
        }

        async fn snapshot(&self) -> StoreResult<Snapshot<RoleBinding>> {
            self.inner.snapshot().await
        }

        async fn changes(&self, since: u64) -> StoreResult<ChangeSet<Change<RoleBinding>>> {
            self.inner.changes(since).await
        }
    }

    struct RacingStore {
        base: InMemoryStore,
        role_bindings: RacingBindings,
    }

    impl ClusterStore for RacingStore {
        fn role_templates(&self) -> &dyn ObjectStore<RoleTemplate> {
            self.base.role_templates()
        }

        fn projects(&self) -> &dyn ObjectStore<Project> {
            self.base.projects()
        }

        fn namespaces(&self) -> &dyn ObjectStore<Namespace> {
            self.base.namespaces()
        }

        fn project_bindings(&self) -> &dyn ObjectStore<ProjectRoleTemplateBinding> {
            self.base.project_bindings()
        }

        fn cluster_bindings(&self) -> &dyn ObjectStore<ClusterRoleTemplateBinding> {
            self.base.cluster_bindings()
        }

        fn cluster_roles(&self) -> &dyn ObjectStore<ClusterRole> {
            self.base.cluster_roles()
        }

        fn role_bindings(&self) -> &dyn ObjectStore<RoleBinding> {
            &self.role_bindings
        }

        fn backend_name(&self) -> &'static str {
            "racing"
        }
    }

    /// A manager over a racing store that already holds a hand-edited
    /// `view-alice` binding in `team-a` owned by `uid-1`.
    async fn drifted_racing_setup() -> (Arc<RacingStore>, Manager) {
        let store = Arc::new(RacingStore {
            base: InMemoryStore::default(),
            role_bindings: RacingBindings {
                inner: MemoryCollection::new(&StoreConfig::default()),
                races: AtomicUsize::new(0),
            },
        });
        register_indexes(store.as_ref()).await.expect("indexes");
        let manager = Manager::new(store.clone(), "local", Duration::from_secs(1));
        let scope = BindingScope::Namespace("team-a".into());
        manager
            .ensure_bindings(&scope, &roles(&["view"]), &declaration("uid-1", "alice"))
            .await
            .expect("first");
        let key = ObjectKey::namespaced("team-a", "view-alice");
        let mut edited = store.role_bindings().get(&key).await.expect("binding");
        edited.subjects.push(Subject::user("mallory"));
        store.role_bindings().update(edited).await.expect("edit");
        (store, manager)
    }

    #[tokio::test]
    async fn converges_and_is_idempotent() {
        let (store, manager) = setup().await;
        let scope = BindingScope::Namespace("team-a".into());
        let owner = declaration("uid-1", "alice");

        let diff = manager
            .ensure_bindings(&scope, &roles(&["view", "edit"]), &owner)
            .await
            .expect("first");
        assert_eq!(diff.created, ["edit-alice", "view-alice"]);

        let again = manager
            .ensure_bindings(&scope, &roles(&["view", "edit"]), &owner)
            .await
            .expect("second");
        assert!(again.is_noop());
        assert_eq!(again.unchanged.len(), 2);

        let shrunk = manager
            .ensure_bindings(&scope, &roles(&["view"]), &owner)
            .await
            .expect("shrink");
        assert_eq!(shrunk.deleted, ["edit-alice"]);

        let remaining = store
            .role_bindings()
            .list(Some("team-a"), &ownership::owned_selector())
            .await
            .expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].role_ref.name, "view");
    }

    #[tokio::test]
    async fn empty_desired_set_clears_only_that_scope() {
        let (store, manager) = setup().await;
        let owner = declaration("uid-1", "alice");
        let team_a = BindingScope::Namespace("team-a".into());
        let team_b = BindingScope::Namespace("team-b".into());
        manager.ensure_bindings(&team_a, &roles(&["view"]), &owner).await.expect("a");
        manager.ensure_bindings(&team_b, &roles(&["view"]), &owner).await.expect("b");

        let diff = manager
            .ensure_bindings(&team_a, &BTreeSet::new(), &owner)
            .await
            .expect("clear");
        assert_eq!(diff.deleted, ["view-alice"]);
        assert_eq!(
            manager.owned_namespaces("uid-1").await.expect("owned"),
            BTreeSet::from(["team-b".to_string()])
        );
        assert_eq!(
            store
                .role_bindings()
                .list(Some("team-b"), &ownership::owned_selector())
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn hand_edited_binding_is_restored() {
        let (store, manager) = setup().await;
        let scope = BindingScope::Cluster;
        let owner = declaration("uid-1", "alice");
        manager.ensure_bindings(&scope, &roles(&["view"]), &owner).await.expect("first");

        let mut edited = store
            .role_bindings()
            .get(&ObjectKey::cluster("view-alice"))
            .await
            .expect("binding");
        edited.subjects.push(vesta_authz::Subject::user("mallory"));
        store.role_bindings().update(edited).await.expect("edit");

        let diff = manager.ensure_bindings(&scope, &roles(&["view"]), &owner).await.expect("fix");
        assert_eq!(diff.updated, ["view-alice"]);
        let fixed = store
            .role_bindings()
            .get(&ObjectKey::cluster("view-alice"))
            .await
            .expect("binding");
        assert!(!fixed.grants_user("mallory"));
    }

    #[tokio::test]
    async fn purge_keeps_listed_owners_and_untagged_bindings() {
        let (store, manager) = setup().await;
        let scope = BindingScope::Namespace("team-a".into());
        manager
            .ensure_bindings(&scope, &roles(&["view"]), &declaration("uid-1", "alice"))
            .await
            .expect("alice");
        manager
            .ensure_bindings(&scope, &roles(&["view"]), &declaration("uid-2", "bob"))
            .await
            .expect("bob");
        store
            .role_bindings()
            .create(RoleBinding {
                metadata: ObjectMeta::namespaced("team-a", "hand-made"),
                subjects: vec![vesta_authz::Subject::user("carol")],
                role_ref: vesta_authz::RoleRef::cluster_role("view"),
            })
            .await
            .expect("untagged");

        let deleted = manager
            .purge_bindings("team-a", &BTreeSet::from(["uid-1".to_string()]))
            .await
            .expect("purge");
        assert_eq!(deleted, ["view-bob"]);
        let left = store
            .role_bindings()
            .list(Some("team-a"), &crate::store::LabelSelector::everything())
            .await
            .expect("list");
        let mut names: Vec<_> = left.iter().map(|b| b.metadata.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["hand-made", "view-alice"]);
    }

    #[tokio::test]
    async fn conflicting_update_is_reread_and_retried() {
        let (store, manager) = drifted_racing_setup().await;
        store.role_bindings.races.store(1, Ordering::SeqCst);

        let diff = manager
            .ensure_bindings(
                &BindingScope::Namespace("team-a".into()),
                &roles(&["view"]),
                &declaration("uid-1", "alice"),
            )
            .await
            .expect("retried");
        assert_eq!(diff.updated, ["view-alice"]);

        let fixed = store
            .role_bindings()
            .get(&ObjectKey::namespaced("team-a", "view-alice"))
            .await
            .expect("binding");
        assert!(fixed.grants_user("alice"));
        assert!(!fixed.grants_user("mallory"));
        assert!(!fixed.grants_user("eve"));
        assert_eq!(ownership::owner_of(&fixed.metadata), Some("uid-1"));
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_after_one_retry() {
        let (store, manager) = drifted_racing_setup().await;
        store.role_bindings.races.store(5, Ordering::SeqCst);

        let err = manager
            .ensure_bindings(
                &BindingScope::Namespace("team-a".into()),
                &roles(&["view"]),
                &declaration("uid-1", "alice"),
            )
            .await
            .expect_err("conflict");
        assert!(
            matches!(&err, ReconcileError::Conflict { kind, name } if *kind == RoleBinding::KIND && name == "view-alice"),
            "{err:?}"
        );
        assert_eq!(store.role_bindings.races.load(Ordering::SeqCst), 3);
    }
}
