//! Casbin-backed evaluation of derived roles and bindings.
//!
//! # Purpose and responsibility
//! Turns low-level roles and the grants visible in one domain into an
//! in-memory enforcer so callers can ask whether a user may perform a verb on
//! a resource.
//!
//! # Key invariants and assumptions
//! - One enforcer covers exactly one domain (a namespace or the cluster).
//! - Users and roles are prefixed (`user:` / `role:`) so a user named like a
//!   role can never inherit it by accident.
//! - API groups and resource names are not evaluated; only verbs and
//!   resources (or non-resource URLs).
use crate::{AuthzResult, PolicyRule, casbin_model};
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};

/// Rules of one low-level role.
#[derive(Debug, Clone, Copy)]
pub struct RoleRules<'a> {
    pub role: &'a str,
    pub rules: &'a [PolicyRule],
}

/// A user holding a role within the enforcer's domain.
#[derive(Debug, Clone, Copy)]
pub struct Grant<'a> {
    pub user: &'a str,
    pub role: &'a str,
}

/// Build an in-memory enforcer for one domain.
///
/// # Errors
/// - Returns Casbin errors for model or policy insertion failures.
///
/// # Example
/// ```rust
/// use vesta_authz::{Grant, PolicyRule, RoleRules, build_enforcer, is_allowed};
///
/// # async fn demo() -> vesta_authz::AuthzResult<()> {
/// let rules = vec![PolicyRule::new(["get"], ["pods"])];
/// let roles = [RoleRules { role: "view", rules: &rules }];
/// let grants = [Grant { user: "alice", role: "view" }];
/// let enforcer = build_enforcer(&roles, &grants, "team-a").await?;
/// assert!(is_allowed(&enforcer, "alice", "team-a", "get", "pods")?);
/// # Ok(())
/// # }
/// ```
pub async fn build_enforcer(
    roles: &[RoleRules<'_>],
    grants: &[Grant<'_>],
    domain: &str,
) -> AuthzResult<Enforcer> {
    let model = casbin_model().await?;
    let adapter = MemoryAdapter::default();
    let mut enforcer = Enforcer::new(model, adapter).await?;

    for role in roles {
        for rule in role.rules {
            for object in rule.objects() {
                for verb in &rule.verbs {
                    enforcer
                        .add_policy(vec![
                            role_subject(role.role),
                            domain.to_string(),
                            object.to_string(),
                            verb.clone(),
                        ])
                        .await?;
                }
            }
        }
    }

    for grant in grants {
        enforcer
            .add_grouping_policy(vec![
                user_subject(grant.user),
                role_subject(grant.role),
                domain.to_string(),
            ])
            .await?;
    }

    enforcer.build_role_links()?;
    Ok(enforcer)
}

/// Ask whether `user` may perform `verb` on `object` within `domain`.
pub fn is_allowed(
    enforcer: &Enforcer,
    user: &str,
    domain: &str,
    verb: &str,
    object: &str,
) -> AuthzResult<bool> {
    let subject = user_subject(user);
    Ok(enforcer.enforce((subject.as_str(), domain, object, verb))?)
}

fn user_subject(user: &str) -> String {
    format!("user:{user}")
}

fn role_subject(role: &str) -> String {
    format!("role:{role}")
}
