//! Low-level access-control objects derived by the controller.
use super::{ObjectMeta, impl_resource};
use serde::{Deserialize, Serialize};
use vesta_authz::{PolicyRule, RoleRef, Subject};

/// Cluster-scoped role holding one template's flattened rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRole {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl_resource!(ClusterRole, "ClusterRole");

impl ClusterRole {
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            rules,
        }
    }
}

/// Grant of a cluster role to subjects; cluster-scoped when `metadata.namespace` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub metadata: ObjectMeta,
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl_resource!(RoleBinding, "RoleBinding");

impl RoleBinding {
    pub fn grants_user(&self, user: &str) -> bool {
        self.subjects.iter().any(|subject| subject.name == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_binding_serializes_in_cluster_shape() {
        let binding = RoleBinding {
            metadata: ObjectMeta::namespaced("web", "view-alice").with_label("owner", "uid-1"),
            subjects: vec![Subject::user("alice")],
            role_ref: RoleRef::cluster_role("view"),
        };
        let value = serde_json::to_value(&binding).expect("json");
        assert_eq!(
            value,
            serde_json::json!({
                "metadata": {
                    "name": "view-alice",
                    "namespace": "web",
                    "labels": {"owner": "uid-1"},
                    "resourceVersion": 0
                },
                "subjects": [{"kind": "User", "name": "alice"}],
                "roleRef": {"kind": "ClusterRole", "name": "view"}
            })
        );
        assert!(binding.grants_user("alice"));
        assert!(!binding.grants_user("bob"));
    }
}
