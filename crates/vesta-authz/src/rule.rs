//! Permission rule primitive.
//!
//! # Purpose
//! Defines the rule shape carried by role templates and low-level roles.
//!
//! # Key invariants
//! - Rule equality is structural and order-sensitive; the role synchronizer
//!   relies on this to detect drift.
//! - `*` in `verbs` or `resources` matches anything.
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// A single grant of verbs over resources.
///
/// # Example
/// ```rust
/// use vesta_authz::PolicyRule;
///
/// let rule = PolicyRule::new(["get", "list"], ["pods"]);
/// assert!(rule.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(
        default,
        rename = "nonResourceURLs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
}

impl PolicyRule {
    /// Build a rule over core resources.
    pub fn new<V, R>(verbs: V, resources: R) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            verbs: verbs.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Reject rules that could never grant anything.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidRule`] when verbs are empty, when neither
    ///   resources nor non-resource URLs are set, or when an entry is blank.
    pub fn validate(&self) -> AuthzResult<()> {
        if self.verbs.is_empty() {
            return Err(AuthzError::InvalidRule("verbs must not be empty".into()));
        }
        if self.resources.is_empty() && self.non_resource_urls.is_empty() {
            return Err(AuthzError::InvalidRule(
                "rule must name resources or non-resource urls".into(),
            ));
        }
        let blank = self
            .verbs
            .iter()
            .chain(&self.resources)
            .chain(&self.non_resource_urls)
            .any(|value| value.trim().is_empty());
        if blank {
            return Err(AuthzError::InvalidRule("rule entries must not be blank".into()));
        }
        Ok(())
    }

    /// Every object the rule covers: resources first, then non-resource URLs.
    pub fn objects(&self) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .chain(&self.non_resource_urls)
            .map(String::as_str)
    }
}
