//! Binding subjects, role references, and binding-name derivation.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    #[default]
    User,
}

/// Identity a low-level binding grants a role to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleRefKind {
    #[default]
    ClusterRole,
}

/// Reference from a binding to the role it grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub kind: RoleRefKind,
    pub name: String,
}

impl RoleRef {
    pub fn cluster_role(name: impl Into<String>) -> Self {
        Self {
            kind: RoleRefKind::ClusterRole,
            name: name.into(),
        }
    }
}

/// Derive the name of the binding granting `role_name` to `subject`.
///
/// The name depends only on the role and subject names, so two
/// reconcilers computing the same grant always target the same object.
pub fn binding_name(role_name: &str, subject: &Subject) -> String {
    format!("{role_name}-{}", subject.name).to_lowercase()
}
