//! Cluster API store boundary.
//!
//! # Purpose
//! The reconciler talks to cluster state only through `ClusterStore`, which
//! hands out one typed `ObjectStore<T>` per kind. Each object store offers
//! CRUD with optimistic concurrency, label-filtered listing, named secondary
//! indexes, and a snapshot + change feed for the watch driver.
use crate::model::{
    Change, ClusterRole, ClusterRoleTemplateBinding, Namespace, ObjectKey, Project,
    ProjectRoleTemplateBinding, Resource, RoleBinding, RoleTemplate,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use vesta_index::{IndexError, IndexFunc};

pub mod memory;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub changes_limit: u64,
    pub change_retention_max_rows: Option<i64>,
}

impl StoreConfig {
    pub fn change_window(&self) -> usize {
        self.change_retention_max_rows
            .unwrap_or(self.changes_limit as i64)
            .max(self.changes_limit as i64) as usize
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            changes_limit: 1000,
            change_retention_max_rows: Some(10_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct ChangeSet<T> {
    pub items: Vec<T>,
    pub next_seq: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("unknown index: {0}")]
    UnknownIndex(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the same call may succeed if simply repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Conflict(_))
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unknown(name) => StoreError::UnknownIndex(name),
            IndexError::Duplicate(name) => {
                StoreError::Conflict(format!("index already registered: {name}"))
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    Exists(String),
}

/// Conjunction of label requirements; the empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
        })
    }
}

/// Typed access to one kind.
///
/// `list(None, ..)` spans every namespace and cluster-scoped objects alike;
/// `list(Some(ns), ..)` returns only objects in `ns`.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> StoreResult<T>;
    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector)
    -> StoreResult<Vec<T>>;
    /// Fails with `AlreadyExists` when the key is taken. Assigns a uid when empty.
    async fn create(&self, object: T) -> StoreResult<T>;
    /// Fails with `Conflict` when `resource_version` is stale.
    async fn update(&self, object: T) -> StoreResult<T>;
    async fn delete(&self, key: &ObjectKey) -> StoreResult<T>;
    async fn add_index(&self, name: &str, func: IndexFunc<T>) -> StoreResult<()>;
    async fn by_index(&self, name: &str, value: &str) -> StoreResult<Vec<T>>;
    async fn snapshot(&self) -> StoreResult<Snapshot<T>>;
    async fn changes(&self, since: u64) -> StoreResult<ChangeSet<Change<T>>>;

    async fn find(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        match self.get(key).await {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub trait ClusterStore: Send + Sync {
    fn role_templates(&self) -> &dyn ObjectStore<RoleTemplate>;
    fn projects(&self) -> &dyn ObjectStore<Project>;
    fn namespaces(&self) -> &dyn ObjectStore<Namespace>;
    fn project_bindings(&self) -> &dyn ObjectStore<ProjectRoleTemplateBinding>;
    fn cluster_bindings(&self) -> &dyn ObjectStore<ClusterRoleTemplateBinding>;
    fn cluster_roles(&self) -> &dyn ObjectStore<ClusterRole>;
    fn role_bindings(&self) -> &dyn ObjectStore<RoleBinding>;
    fn backend_name(&self) -> &'static str;
}
