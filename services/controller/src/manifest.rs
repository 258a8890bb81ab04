//! Seed manifests: declarative YAML applied to the store as create-or-update.
//!
//! ```yaml
//! roleTemplates:
//!   - metadata: { name: view }
//!     rules:
//!       - verbs: [get, list]
//!         resources: [pods]
//! projects:
//!   - metadata: { name: p-web }
//!     clusterName: local
//! namespaces:
//!   - metadata:
//!       name: web
//!       annotations: { authz.vesta.io/project-id: "local:p-web" }
//! projectRoleTemplateBindings:
//!   - metadata: { name: alice-view }
//!     projectName: "local:p-web"
//!     userName: alice
//!     roleTemplateName: view
//! ```
use crate::model::{
    ClusterRoleTemplateBinding, Namespace, Project, ProjectRoleTemplateBinding, Resource,
    RoleTemplate,
};
use crate::reconcile::Manager;
use crate::store::{ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use vesta_authz::AuthzError;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("read manifest {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse manifest")]
    Parse(#[from] serde_yaml::Error),
    #[error("role template {template} has an invalid rule")]
    InvalidRule {
        template: String,
        #[source]
        source: AuthzError,
    },
    #[error("apply {kind} {name}")]
    Store {
        kind: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub role_templates: Vec<RoleTemplate>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub project_role_template_bindings: Vec<ProjectRoleTemplateBinding>,
    #[serde(default)]
    pub cluster_role_template_bindings: Vec<ClusterRoleTemplateBinding>,
}

/// Objects written by one `Manifest::apply`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
}

impl Manifest {
    pub fn from_yaml(contents: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        for template in &self.role_templates {
            for rule in &template.rules {
                rule.validate().map_err(|source| ManifestError::InvalidRule {
                    template: template.metadata.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Templates first so declarations resolve as soon as they are seen.
    pub async fn apply(&self, manager: &Manager) -> Result<ApplySummary, ManifestError> {
        self.validate()?;
        let store = manager.store();
        let mut summary = ApplySummary::default();
        for template in &self.role_templates {
            upsert(manager, store.role_templates(), template.clone(), &mut summary).await?;
        }
        for project in &self.projects {
            upsert(manager, store.projects(), project.clone(), &mut summary).await?;
        }
        for namespace in &self.namespaces {
            upsert(manager, store.namespaces(), namespace.clone(), &mut summary).await?;
        }
        for binding in &self.project_role_template_bindings {
            upsert(manager, store.project_bindings(), binding.clone(), &mut summary).await?;
        }
        for binding in &self.cluster_role_template_bindings {
            upsert(manager, store.cluster_bindings(), binding.clone(), &mut summary).await?;
        }
        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            "applied manifest"
        );
        Ok(summary)
    }
}

async fn upsert<T: Resource + PartialEq>(
    manager: &Manager,
    store: &dyn ObjectStore<T>,
    mut object: T,
    summary: &mut ApplySummary,
) -> Result<(), ManifestError> {
    let key = object.key();
    let store_error = |source: StoreError| ManifestError::Store {
        kind: T::KIND,
        name: key.to_string(),
        source,
    };
    match manager.bounded(store.find(&key)).await.map_err(store_error)? {
        Some(existing) => {
            let meta = object.metadata_mut();
            meta.uid = existing.metadata().uid.clone();
            meta.resource_version = existing.metadata().resource_version;
            if object == existing {
                return Ok(());
            }
            manager
                .bounded(store.update(object))
                .await
                .map_err(store_error)?;
            summary.updated += 1;
        }
        None => {
            manager
                .bounded(store.create(object))
                .await
                .map_err(store_error)?;
            summary.created += 1;
        }
    }
    Ok(())
}
