//! Change-feed payloads.
use super::ObjectKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

/// One entry of a kind's change feed.
///
/// `object` is the state after the change; for `Deleted` it is the last state
/// before removal so hooks can still see what went away.
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub seq: u64,
    pub op: ChangeOp,
    pub key: ObjectKey,
    pub object: T,
}
