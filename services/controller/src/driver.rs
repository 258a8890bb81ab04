//! Watch driver: pumps each kind's change feed into its hooks.
//!
//! # Purpose
//! Stands in for the event-delivery framework. Every pass pumps the five
//! watched kinds concurrently; each kind keeps its own cursor and retry queue.
//!
//! # Delivery model
//! - First pass: full snapshot, delivered as creates.
//! - Later passes: `changes(since)`; when the feed has dropped entries the
//!   cursor points into, the kind is re-snapshotted and delivered as updates.
//! - A failed delivery is queued and retried on the next pass after
//!   re-reading the object (dropped if it no longer exists). Removals are
//!   retried with the object as it was and are queued per uid, so a later
//!   event for a recreated object never cancels them. After
//!   `retry_max_attempts` the event is abandoned with an error log.
use crate::lifecycle::{Hooks, Watched};
use crate::model::{
    Change, ChangeOp, ClusterRoleTemplateBinding, Namespace, ObjectKey, Project,
    ProjectRoleTemplateBinding, Resource, RoleTemplate,
};
use crate::reconcile::Manager;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Counters for one `sync_once` pass across all kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub dropped: usize,
    pub resnapshots: usize,
    pub feed_errors: usize,
    /// Events still queued for retry after this pass.
    pub pending: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.dropped += other.dropped;
        self.resnapshots += other.resnapshots;
        self.feed_errors += other.feed_errors;
        self.pending += other.pending;
    }

    /// Nothing was delivered and nothing is waiting.
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.pending == 0 && self.feed_errors == 0
    }
}

struct Pending<T> {
    op: ChangeOp,
    object: T,
    attempts: u32,
}

/// Retry slot. Creates and updates share one slot per key; every removed uid
/// gets its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    key: ObjectKey,
    removed_uid: Option<String>,
}

impl PendingKey {
    fn of<T: Resource>(op: ChangeOp, object: &T) -> Self {
        let removed_uid = match op {
            ChangeOp::Deleted => Some(object.metadata().uid.clone()),
            ChangeOp::Created | ChangeOp::Updated => None,
        };
        Self {
            key: object.key(),
            removed_uid,
        }
    }
}

struct Pump<T> {
    cursor: Option<u64>,
    pending: BTreeMap<PendingKey, Pending<T>>,
}

impl<T> Default for Pump<T> {
    fn default() -> Self {
        Self {
            cursor: None,
            pending: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct Pumps {
    role_templates: Pump<RoleTemplate>,
    projects: Pump<Project>,
    namespaces: Pump<Namespace>,
    project_bindings: Pump<ProjectRoleTemplateBinding>,
    cluster_bindings: Pump<ClusterRoleTemplateBinding>,
}

pub struct WatchDriver {
    manager: Manager,
    retry_max_attempts: u32,
    pumps: Mutex<Pumps>,
}

impl WatchDriver {
    pub fn new(manager: Manager, retry_max_attempts: u32) -> Self {
        Self {
            manager,
            retry_max_attempts: retry_max_attempts.max(1),
            pumps: Mutex::new(Pumps::default()),
        }
    }

    /// One pass over every kind. Passes never overlap.
    pub async fn sync_once(&self, hooks: &Hooks) -> SyncReport {
        let mut guard = self.pumps.lock().await;
        let pumps = &mut *guard;
        let (templates, projects, namespaces, project_bindings, cluster_bindings) = tokio::join!(
            self.pump(hooks, &mut pumps.role_templates),
            self.pump(hooks, &mut pumps.projects),
            self.pump(hooks, &mut pumps.namespaces),
            self.pump(hooks, &mut pumps.project_bindings),
            self.pump(hooks, &mut pumps.cluster_bindings),
        );
        let mut report = SyncReport::default();
        for part in [templates, projects, namespaces, project_bindings, cluster_bindings] {
            report.merge(part);
        }
        report
    }

    async fn pump<T: Watched>(&self, hooks: &Hooks, pump: &mut Pump<T>) -> SyncReport {
        let mut report = SyncReport::default();
        self.retry_pending(hooks, pump, &mut report).await;

        let collection = T::collection(self.manager.store());
        match pump.cursor {
            None => match self.manager.bounded(collection.snapshot()).await {
                Ok(snapshot) => {
                    tracing::debug!(kind = T::KIND, items = snapshot.items.len(), "initial snapshot");
                    for object in snapshot.items {
                        self.deliver(hooks, pump, ChangeOp::Created, object, 0, &mut report)
                            .await;
                    }
                    pump.cursor = Some(snapshot.next_seq);
                }
                Err(err) => {
                    tracing::warn!(kind = T::KIND, error = %err, "snapshot failed");
                    report.feed_errors += 1;
                }
            },
            Some(since) => match self.manager.bounded(collection.changes(since)).await {
                Ok(changes) if has_gap(since, &changes.items, changes.next_seq) => {
                    tracing::warn!(kind = T::KIND, since, "change feed gap, re-snapshotting");
                    report.resnapshots += 1;
                    match self.manager.bounded(collection.snapshot()).await {
                        Ok(snapshot) => {
                            for object in snapshot.items {
                                self.deliver(hooks, pump, ChangeOp::Updated, object, 0, &mut report)
                                    .await;
                            }
                            pump.cursor = Some(snapshot.next_seq);
                        }
                        Err(err) => {
                            tracing::warn!(kind = T::KIND, error = %err, "re-snapshot failed");
                            report.feed_errors += 1;
                        }
                    }
                }
                Ok(changes) => {
                    for change in changes.items {
                        self.deliver(hooks, pump, change.op, change.object, 0, &mut report)
                            .await;
                    }
                    pump.cursor = Some(changes.next_seq);
                }
                Err(err) => {
                    tracing::warn!(kind = T::KIND, error = %err, "change poll failed");
                    report.feed_errors += 1;
                }
            },
        }

        report.pending = pump.pending.len();
        report
    }

    async fn retry_pending<T: Watched>(&self, hooks: &Hooks, pump: &mut Pump<T>, report: &mut SyncReport) {
        let collection = T::collection(self.manager.store());
        for (slot, pending) in std::mem::take(&mut pump.pending) {
            let object = if pending.op == ChangeOp::Deleted {
                pending.object
            } else {
                let key = &slot.key;
                match self.manager.bounded(collection.find(key)).await {
                    Ok(Some(current)) => current,
                    Ok(None) => {
                        tracing::debug!(kind = T::KIND, %key, "object gone, dropping retry");
                        report.dropped += 1;
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(kind = T::KIND, %key, error = %err, "retry re-read failed");
                        pump.pending.insert(slot, pending);
                        continue;
                    }
                }
            };
            self.deliver(hooks, pump, pending.op, object, pending.attempts, report)
                .await;
        }
    }

    async fn deliver<T: Watched>(
        &self,
        hooks: &Hooks,
        pump: &mut Pump<T>,
        op: ChangeOp,
        object: T,
        attempts: u32,
        report: &mut SyncReport,
    ) {
        let slot = PendingKey::of(op, &object);
        match T::hooks(hooks).deliver(op, &object).await {
            Ok(()) => {
                report.delivered += 1;
                // A newer create or update supersedes the queued one; queued
                // removals of other uids stay.
                pump.pending.remove(&slot);
            }
            Err(failure) => {
                report.failed += 1;
                let attempts = attempts + 1;
                if attempts >= self.retry_max_attempts {
                    tracing::error!(
                        kind = T::KIND,
                        key = %slot.key,
                        ?op,
                        attempts,
                        error = %failure.source,
                        "giving up on event"
                    );
                    report.abandoned += 1;
                    pump.pending.remove(&slot);
                    return;
                }
                pump.pending.insert(
                    slot,
                    Pending {
                        op,
                        object,
                        attempts,
                    },
                );
            }
        }
    }
}

// The feed no longer holds the entry at `since`.
fn has_gap<T>(since: u64, items: &[Change<T>], next_seq: u64) -> bool {
    match items.first() {
        Some(first) => first.seq > since,
        None => since < next_seq,
    }
}
