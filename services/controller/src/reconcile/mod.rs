//! Reconciliation primitives shared by every lifecycle coordinator.
//!
//! # Purpose
//! `Manager` is the single handle coordinators receive: the store, the
//! cluster this controller is responsible for, and the per-call timeout. The
//! resolver, role synchronizer and binding synchronizer are methods on it.
//!
//! # Key invariants
//! - Every store call goes through `Manager::bounded`, so a slow store yields
//!   `StoreError::Timeout` and never a false "not found".
//! - All operations are idempotent; callers may repeat them freely.
mod bindings;
mod error;
pub mod ownership;
mod resolver;
mod roles;

pub use bindings::{BindingDiff, BindingScope};
pub use error::{ReconcileError, ReconcileResult};
pub(crate) use error::FirstError;
pub use roles::RoleSync;

use crate::store::{ClusterStore, StoreError, StoreResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Manager {
    store: Arc<dyn ClusterStore>,
    cluster_name: String,
    timeout: Duration,
}

impl Manager {
    pub fn new(store: Arc<dyn ClusterStore>, cluster_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            cluster_name: cluster_name.into(),
            timeout,
        }
    }

    pub fn store(&self) -> &dyn ClusterStore {
        self.store.as_ref()
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one store call under the configured timeout.
    pub async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("backend", &self.store.backend_name())
            .field("cluster_name", &self.cluster_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn bounded_maps_elapsed_calls_to_timeout() {
        let manager = Manager::new(
            Arc::new(InMemoryStore::default()),
            "local",
            Duration::from_millis(10),
        );
        let err = manager
            .bounded(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, StoreError>(())
            })
            .await
            .expect_err("timeout");
        assert!(matches!(err, StoreError::Timeout(_)));

        let value = manager.bounded(async { Ok::<_, StoreError>(7) }).await.expect("value");
        assert_eq!(value, 7);
    }
}
