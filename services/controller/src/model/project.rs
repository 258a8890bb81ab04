//! Projects and namespace membership.
//!
//! # Purpose
//! A project groups namespaces of one cluster. Membership is expressed only by
//! the project-id annotation on the namespace; projects never list their
//! namespaces.
use super::{ObjectMeta, impl_resource};
use serde::{Deserialize, Serialize};

/// Annotation on a namespace naming the project it belongs to.
pub const PROJECT_ID_ANNOTATION: &str = "authz.vesta.io/project-id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub metadata: ObjectMeta,
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

impl_resource!(Project, "Project");

impl Project {
    pub fn new(cluster_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            cluster_name: cluster_name.into(),
            display_name: String::new(),
        }
    }

    /// Fully qualified id (`{cluster}:{project}`) used by namespaces and declarations.
    pub fn project_id(&self) -> String {
        format!("{}:{}", self.cluster_name, self.metadata.name)
    }
}

/// Cluster component of a `{cluster}:{project}` id, if it has one.
pub fn cluster_of_project(project_id: &str) -> Option<&str> {
    project_id
        .split_once(':')
        .map(|(cluster, _)| cluster)
        .filter(|cluster| !cluster.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl_resource!(Namespace, "Namespace");

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
        }
    }

    pub fn in_project(name: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name).with_annotation(PROJECT_ID_ANNOTATION, project_id),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(PROJECT_ID_ANNOTATION)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}
