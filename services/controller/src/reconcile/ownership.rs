//! Ownership tagging of derived bindings.
//!
//! A derived `RoleBinding` belongs to exactly one declaration, recorded as the
//! declaration's uid under `OWNER_LABEL`. Everything that reads or writes the
//! tag goes through this module.
use super::BindingScope;
use crate::model::{ObjectMeta, RoleBinding};
use crate::store::LabelSelector;
use vesta_authz::{RoleRef, Subject, binding_name};

pub const OWNER_LABEL: &str = "authz.vesta.io/rtb-owner";

pub fn owner_of(meta: &ObjectMeta) -> Option<&str> {
    meta.labels
        .get(OWNER_LABEL)
        .map(String::as_str)
        .filter(|owner| !owner.is_empty())
}

pub fn set_owner(meta: &mut ObjectMeta, owner: &str) {
    meta.labels.insert(OWNER_LABEL.to_string(), owner.to_string());
}

/// Selects every binding carrying an owner tag, whoever the owner is.
pub fn owned_selector() -> LabelSelector {
    LabelSelector::everything().with_key(OWNER_LABEL)
}

/// The binding `owner` wants for `role` and `subject` within `scope`.
pub fn owned_binding(scope: &BindingScope, role: &str, subject: &Subject, owner: &str) -> RoleBinding {
    let name = binding_name(role, subject);
    let metadata = match scope.namespace() {
        Some(namespace) => ObjectMeta::namespaced(namespace, name),
        None => ObjectMeta::named(name),
    };
    RoleBinding {
        metadata: metadata.with_label(OWNER_LABEL, owner),
        subjects: vec![subject.clone()],
        role_ref: RoleRef::cluster_role(role),
    }
}

/// Same grant and same owner; metadata other than the tag is ignored.
pub fn same_grant(observed: &RoleBinding, desired: &RoleBinding) -> bool {
    observed.subjects == desired.subjects
        && observed.role_ref == desired.role_ref
        && owner_of(&observed.metadata) == owner_of(&desired.metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_binding_is_named_and_tagged() {
        let scope = BindingScope::Namespace("team-a".into());
        let binding = owned_binding(&scope, "Project-Member", &Subject::user("Alice"), "uid-1");
        assert_eq!(binding.metadata.name, "project-member-alice");
        assert_eq!(binding.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(owner_of(&binding.metadata), Some("uid-1"));
        assert_eq!(binding.role_ref.name, "Project-Member");

        let cluster = owned_binding(&BindingScope::Cluster, "admin", &Subject::user("bob"), "uid-2");
        assert_eq!(cluster.metadata.namespace, None);
        assert!(owned_selector().matches(&cluster.metadata.labels));
    }

    #[test]
    fn a_different_owner_is_a_different_grant() {
        let scope = BindingScope::Cluster;
        let mine = owned_binding(&scope, "view", &Subject::user("alice"), "uid-1");
        let mut theirs = mine.clone();
        set_owner(&mut theirs.metadata, "uid-2");
        assert!(same_grant(&mine, &mine.clone()));
        assert!(!same_grant(&theirs, &mine));
    }
}
