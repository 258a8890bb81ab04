//! Synchronizes one low-level `ClusterRole` per resolved template.
use super::{Manager, ReconcileError, ReconcileResult};
use crate::model::{ClusterRole, ObjectKey, Resource, RoleTemplate};
use crate::store::StoreError;
use std::collections::BTreeMap;

/// Outcome of synchronizing one template's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSync {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

impl RoleSync {
    fn as_str(self) -> &'static str {
        match self {
            RoleSync::Created => "created",
            RoleSync::Updated => "updated",
            RoleSync::Unchanged => "unchanged",
            RoleSync::Skipped => "skipped",
        }
    }
}

// One re-read after a lost race, then give up.
const ROLE_SYNC_ATTEMPTS: usize = 2;

impl Manager {
    /// Ensure a role exists with matching rules for every non-external template.
    ///
    /// Stops at the first failure; roles already written stay written.
    pub async fn ensure_roles(&self, resolved: &BTreeMap<String, RoleTemplate>) -> ReconcileResult<()> {
        for template in resolved.values() {
            self.ensure_role(template).await?;
        }
        Ok(())
    }

    pub async fn ensure_role(&self, template: &RoleTemplate) -> ReconcileResult<RoleSync> {
        let name = template.metadata.name.as_str();
        if template.external {
            tracing::debug!(template = name, "skipping external role template");
            return Ok(RoleSync::Skipped);
        }

        let roles = self.store().cluster_roles();
        let key = ObjectKey::cluster(name);
        for attempt in 1..=ROLE_SYNC_ATTEMPTS {
            let existing = self
                .bounded(roles.find(&key))
                .await
                .map_err(|err| ReconcileError::store("get", ClusterRole::KIND, name, "cluster", err))?;

            let outcome = match existing {
                None => {
                    let role = ClusterRole::new(name, template.rules.clone());
                    match self.bounded(roles.create(role)).await {
                        Ok(_) => RoleSync::Created,
                        Err(StoreError::AlreadyExists(_)) => {
                            tracing::debug!(template = name, attempt, "role created concurrently, re-reading");
                            continue;
                        }
                        Err(err) => {
                            return Err(ReconcileError::store(
                                "create",
                                ClusterRole::KIND,
                                name,
                                "cluster",
                                err,
                            ));
                        }
                    }
                }
                Some(role) if role.rules == template.rules => RoleSync::Unchanged,
                Some(mut role) => {
                    role.rules = template.rules.clone();
                    match self.bounded(roles.update(role)).await {
                        Ok(_) => RoleSync::Updated,
                        Err(StoreError::Conflict(_)) => {
                            tracing::debug!(template = name, attempt, "role update conflicted, re-reading");
                            continue;
                        }
                        Err(err) => {
                            return Err(ReconcileError::store(
                                "update",
                                ClusterRole::KIND,
                                name,
                                "cluster",
                                err,
                            ));
                        }
                    }
                }
            };

            if outcome != RoleSync::Unchanged {
                tracing::info!(template = name, op = outcome.as_str(), "synchronized role");
                metrics::counter!("vesta_roles_synced_total", "op" => outcome.as_str()).increment(1);
            }
            return Ok(outcome);
        }

        Err(ReconcileError::Conflict {
            kind: ClusterRole::KIND,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ClusterStore;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use vesta_authz::PolicyRule;

    fn manager() -> (Arc<InMemoryStore>, Manager) {
        let store = Arc::new(InMemoryStore::default());
        let manager = Manager::new(store.clone(), "local", Duration::from_secs(1));
        (store, manager)
    }

    #[tokio::test]
    async fn creates_then_leaves_matching_role_alone() {
        let (store, manager) = manager();
        let template = RoleTemplate::new("view", vec![PolicyRule::new(["get", "list"], ["pods"])]);
        assert_eq!(manager.ensure_role(&template).await.expect("sync"), RoleSync::Created);
        let version = store
            .cluster_roles()
            .get(&ObjectKey::cluster("view"))
            .await
            .expect("role")
            .metadata
            .resource_version;

        assert_eq!(manager.ensure_role(&template).await.expect("sync"), RoleSync::Unchanged);
        let role = store
            .cluster_roles()
            .get(&ObjectKey::cluster("view"))
            .await
            .expect("role");
        assert_eq!(role.metadata.resource_version, version);
    }

    #[tokio::test]
    async fn drifted_rules_are_overwritten() {
        let (store, manager) = manager();
        store
            .cluster_roles()
            .create(ClusterRole::new("view", vec![PolicyRule::new(["*"], ["*"])]))
            .await
            .expect("seed");
        let template = RoleTemplate::new("view", vec![PolicyRule::new(["get"], ["pods"])]);
        assert_eq!(manager.ensure_role(&template).await.expect("sync"), RoleSync::Updated);
        let role = store
            .cluster_roles()
            .get(&ObjectKey::cluster("view"))
            .await
            .expect("role");
        assert_eq!(role.rules, template.rules);
    }

    #[tokio::test]
    async fn external_templates_never_produce_roles() {
        let (store, manager) = manager();
        let template = RoleTemplate::new("cluster-owner", vec![PolicyRule::new(["*"], ["*"])]).external();
        let resolved = BTreeMap::from([(template.metadata.name.clone(), template)]);
        manager.ensure_roles(&resolved).await.expect("sync");
        assert!(
            store
                .cluster_roles()
                .find(&ObjectKey::cluster("cluster-owner"))
                .await
                .expect("find")
                .is_none()
        );
    }
}
