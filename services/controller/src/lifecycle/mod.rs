//! Lifecycle hooks and the per-kind coordinators behind them.
//!
//! # Purpose
//! A coordinator implements `Lifecycle<T>` for one watched kind and turns a
//! create/update/remove of that kind into resolver, role and binding calls.
//! `Hooks` is the registry the watch driver delivers into: one typed
//! `HookSet<T>` per kind, each hook registered under a stable name.
//!
//! # Key invariants
//! - Coordinators are stateless; every invocation recomputes from the store.
//! - A hook returning an error is redelivered later, so hooks must tolerate
//!   running more than once for the same object.
mod cluster_binding;
mod namespace;
mod project;
mod project_binding;
mod role_template;

pub use cluster_binding::ClusterBindingLifecycle;
pub use namespace::NamespaceLifecycle;
pub use project::ProjectLifecycle;
pub use project_binding::ProjectBindingLifecycle;
pub use role_template::RoleTemplateLifecycle;

pub(crate) use cluster_binding::sync_cluster_binding;
pub(crate) use namespace::reconcile_namespace;
pub(crate) use project_binding::sync_project_binding;

use crate::model::{
    ChangeOp, ClusterRoleTemplateBinding, Namespace, ObjectKey, Project,
    ProjectRoleTemplateBinding, Resource, RoleTemplate,
};
use crate::reconcile::{ReconcileError, ReconcileResult};
use crate::store::{ClusterStore, ObjectStore};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub const PROJECT_HOOK: &str = "project-namespace-auth";
pub const PROJECT_BINDING_HOOK: &str = "cluster-prtb-sync";
pub const CLUSTER_BINDING_HOOK: &str = "cluster-crtb-sync";
pub const ROLE_TEMPLATE_HOOK: &str = "cluster-roletemplate-sync";
pub const NAMESPACE_HOOK: &str = "namespace-auth";

#[async_trait]
pub trait Lifecycle<T: Resource>: Send + Sync {
    async fn create(&self, object: &T) -> ReconcileResult<()>;
    async fn updated(&self, object: &T) -> ReconcileResult<()>;
    async fn remove(&self, object: &T) -> ReconcileResult<()>;
}

#[derive(Debug, Error)]
#[error("hook {hook} failed for {kind} {key}")]
pub struct HookFailure {
    pub hook: String,
    pub kind: &'static str,
    pub key: ObjectKey,
    #[source]
    pub source: ReconcileError,
}

struct Hook<T> {
    name: String,
    cluster: Option<String>,
    handler: Arc<dyn Lifecycle<T>>,
}

/// Hooks registered for one kind, run in registration order.
pub struct HookSet<T> {
    hooks: Vec<Hook<T>>,
}

impl<T> Default for HookSet<T> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<T: Watched> HookSet<T> {
    pub fn add(&mut self, name: impl Into<String>, handler: Arc<dyn Lifecycle<T>>) {
        self.hooks.push(Hook {
            name: name.into(),
            cluster: None,
            handler,
        });
    }

    /// Register a hook that only sees objects of `cluster` (and objects that
    /// belong to no cluster at all, such as role templates).
    pub fn add_cluster_scoped(
        &mut self,
        name: impl Into<String>,
        cluster: impl Into<String>,
        handler: Arc<dyn Lifecycle<T>>,
    ) {
        self.hooks.push(Hook {
            name: name.into(),
            cluster: Some(cluster.into()),
            handler,
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every matching hook; all of them run even when one fails.
    pub async fn deliver(&self, op: ChangeOp, object: &T) -> Result<(), HookFailure> {
        let mut first_failure = None;
        for hook in &self.hooks {
            if let (Some(scope), Some(cluster)) = (hook.cluster.as_deref(), object.cluster_name()) {
                if scope != cluster {
                    continue;
                }
            }
            let result = match op {
                ChangeOp::Created => hook.handler.create(object).await,
                ChangeOp::Updated => hook.handler.updated(object).await,
                ChangeOp::Deleted => hook.handler.remove(object).await,
            };
            if let Err(err) = result {
                metrics::counter!("vesta_hook_failures_total", "kind" => T::KIND).increment(1);
                tracing::warn!(
                    hook = %hook.name,
                    kind = T::KIND,
                    key = %object.key(),
                    op = ?op,
                    error = %err,
                    "lifecycle hook failed"
                );
                if first_failure.is_none() {
                    first_failure = Some(HookFailure {
                        hook: hook.name.clone(),
                        kind: T::KIND,
                        key: object.key(),
                        source: err,
                    });
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Hook registry with one typed set per watched kind.
#[derive(Default)]
pub struct Hooks {
    pub role_templates: HookSet<RoleTemplate>,
    pub projects: HookSet<Project>,
    pub namespaces: HookSet<Namespace>,
    pub project_bindings: HookSet<ProjectRoleTemplateBinding>,
    pub cluster_bindings: HookSet<ClusterRoleTemplateBinding>,
}

/// A kind the watch driver pumps into hooks.
pub trait Watched: Resource {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self>;
    fn hooks(hooks: &Hooks) -> &HookSet<Self>;
    /// Cluster the object belongs to, when it belongs to one.
    fn cluster_name(&self) -> Option<&str>;
}

impl Watched for RoleTemplate {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self> {
        store.role_templates()
    }

    fn hooks(hooks: &Hooks) -> &HookSet<Self> {
        &hooks.role_templates
    }

    fn cluster_name(&self) -> Option<&str> {
        None
    }
}

impl Watched for Project {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self> {
        store.projects()
    }

    fn hooks(hooks: &Hooks) -> &HookSet<Self> {
        &hooks.projects
    }

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}

impl Watched for Namespace {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self> {
        store.namespaces()
    }

    fn hooks(hooks: &Hooks) -> &HookSet<Self> {
        &hooks.namespaces
    }

    // Namespaces are local to the cluster this controller runs against.
    fn cluster_name(&self) -> Option<&str> {
        None
    }
}

impl Watched for ProjectRoleTemplateBinding {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self> {
        store.project_bindings()
    }

    fn hooks(hooks: &Hooks) -> &HookSet<Self> {
        &hooks.project_bindings
    }

    fn cluster_name(&self) -> Option<&str> {
        ProjectRoleTemplateBinding::cluster_name(self)
    }
}

impl Watched for ClusterRoleTemplateBinding {
    fn collection(store: &dyn ClusterStore) -> &dyn ObjectStore<Self> {
        store.cluster_bindings()
    }

    fn hooks(hooks: &Hooks) -> &HookSet<Self> {
        &hooks.cluster_bindings
    }

    fn cluster_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }
}
