//! Controller data model.
//!
//! # Purpose
//! Re-exports the watched kinds (templates, projects, namespaces, binding
//! declarations), the derived low-level kinds, and the change payloads the
//! store emits for them.
mod binding;
mod change;
mod meta;
mod project;
mod rbac;
mod template;

pub use binding::{BindingDeclaration, ClusterRoleTemplateBinding, ProjectRoleTemplateBinding};
pub use change::{Change, ChangeOp};
pub(crate) use meta::impl_resource;
pub use meta::{ObjectKey, ObjectMeta, Resource};
pub use project::{Namespace, PROJECT_ID_ANNOTATION, Project, cluster_of_project};
pub use rbac::{ClusterRole, RoleBinding};
pub use template::RoleTemplate;
