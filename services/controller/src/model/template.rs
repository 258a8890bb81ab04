//! Role template definitions.
use super::{ObjectMeta, impl_resource};
use serde::{Deserialize, Serialize};
use vesta_authz::PolicyRule;

/// Named, composable set of permission rules.
///
/// `role_template_names` are inheritance edges: resolving a template pulls in
/// every template it names, recursively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTemplate {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub role_template_names: Vec<String>,
    /// Rules are owned elsewhere; no low-level role is ever synchronized for it.
    #[serde(default)]
    pub external: bool,
}

impl_resource!(RoleTemplate, "RoleTemplate");

impl RoleTemplate {
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            rules,
            ..Self::default()
        }
    }

    pub fn inheriting<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_template_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }
}
