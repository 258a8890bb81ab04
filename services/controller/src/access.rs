//! Access review over derived roles and bindings.
//!
//! Answers "may this user do this verb on this resource here?" from the
//! low-level objects alone, which is what a cluster's authorizer would see.
use crate::model::ClusterRole;
use crate::store::{ClusterStore, LabelSelector, StoreError};
use std::collections::BTreeSet;
use thiserror::Error;
use vesta_authz::{AuthzError, Grant, RoleRules, build_enforcer, is_allowed};

const CLUSTER_DOMAIN: &str = "cluster";

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Authz(#[from] AuthzError),
}

/// Evaluate one request against the bindings visible in `namespace`.
///
/// Cluster-scoped bindings apply everywhere; namespaced bindings apply only
/// within their namespace. `None` reviews a cluster-wide request, which only
/// cluster-scoped bindings can grant.
pub async fn review_access(
    store: &dyn ClusterStore,
    user: &str,
    namespace: Option<&str>,
    verb: &str,
    resource: &str,
) -> Result<bool, AccessError> {
    let bindings = store
        .role_bindings()
        .list(None, &LabelSelector::everything())
        .await?;
    let visible: Vec<_> = bindings
        .iter()
        .filter(|binding| match binding.metadata.namespace.as_deref() {
            None => true,
            Some(ns) => Some(ns) == namespace,
        })
        .filter(|binding| binding.grants_user(user))
        .collect();
    if visible.is_empty() {
        return Ok(false);
    }

    let referenced: BTreeSet<&str> = visible
        .iter()
        .map(|binding| binding.role_ref.name.as_str())
        .collect();
    let roles: Vec<ClusterRole> = store
        .cluster_roles()
        .list(None, &LabelSelector::everything())
        .await?
        .into_iter()
        .filter(|role| referenced.contains(role.metadata.name.as_str()))
        .collect();

    let domain = namespace.unwrap_or(CLUSTER_DOMAIN);
    let role_rules: Vec<RoleRules<'_>> = roles
        .iter()
        .map(|role| RoleRules {
            role: &role.metadata.name,
            rules: &role.rules,
        })
        .collect();
    let grants: Vec<Grant<'_>> = visible
        .iter()
        .map(|binding| Grant {
            user,
            role: &binding.role_ref.name,
        })
        .collect();
    let enforcer = build_enforcer(&role_rules, &grants, domain).await?;
    let allowed = is_allowed(&enforcer, user, domain, verb, resource)?;
    tracing::debug!(user, namespace = domain, verb, resource, allowed, "access review");
    Ok(allowed)
}
