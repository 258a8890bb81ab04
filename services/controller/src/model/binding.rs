//! Binding declarations authored by administrators.
//!
//! # Purpose
//! A declaration grants one user the effective permissions of a role template
//! within a project or a whole cluster. The controller only reacts to these;
//! it never creates or edits one.
//!
//! # Key invariants
//! - `metadata.uid` is the ownership tag for every low-level object the
//!   declaration produces; it must be unique and stable.
use super::project::cluster_of_project;
use super::{ObjectMeta, impl_resource};
use serde::{Deserialize, Serialize};
use vesta_authz::Subject;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRoleTemplateBinding {
    pub metadata: ObjectMeta,
    /// `{cluster}:{project}` id, matched against namespace annotations.
    pub project_name: String,
    pub user_name: String,
    pub role_template_name: String,
}

impl_resource!(ProjectRoleTemplateBinding, "ProjectRoleTemplateBinding");

impl ProjectRoleTemplateBinding {
    pub fn new(
        name: impl Into<String>,
        project_name: impl Into<String>,
        user_name: impl Into<String>,
        role_template_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            project_name: project_name.into(),
            user_name: user_name.into(),
            role_template_name: role_template_name.into(),
        }
    }

    pub fn cluster_name(&self) -> Option<&str> {
        cluster_of_project(&self.project_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleTemplateBinding {
    pub metadata: ObjectMeta,
    pub cluster_name: String,
    pub user_name: String,
    pub role_template_name: String,
}

impl_resource!(ClusterRoleTemplateBinding, "ClusterRoleTemplateBinding");

impl ClusterRoleTemplateBinding {
    pub fn new(
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        user_name: impl Into<String>,
        role_template_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            cluster_name: cluster_name.into(),
            user_name: user_name.into(),
            role_template_name: role_template_name.into(),
        }
    }
}

/// What the binding synchronizer needs from either declaration kind.
pub trait BindingDeclaration {
    fn owner_uid(&self) -> &str;
    fn user_name(&self) -> &str;
    fn role_template_name(&self) -> &str;

    fn subject(&self) -> Subject {
        Subject::user(self.user_name())
    }
}

impl BindingDeclaration for ProjectRoleTemplateBinding {
    fn owner_uid(&self) -> &str {
        &self.metadata.uid
    }

    fn user_name(&self) -> &str {
        &self.user_name
    }

    fn role_template_name(&self) -> &str {
        &self.role_template_name
    }
}

impl BindingDeclaration for ClusterRoleTemplateBinding {
    fn owner_uid(&self) -> &str {
        &self.metadata.uid
    }

    fn user_name(&self) -> &str {
        &self.user_name
    }

    fn role_template_name(&self) -> &str {
        &self.role_template_name
    }
}
