//! Seams between the index and its collaborators.

use proxless_core::RouteSpec;

use crate::error::StateResult;
use crate::index::RouteIndex;

/// The two entry points discovery uses to feed backend metadata in.
pub trait RouteSink: Send + Sync {
    fn upsert(&self, spec: RouteSpec) -> StateResult<()>;
    fn delete(&self, id: &str) -> StateResult<()>;
}

/// Cross-replica mirroring of the volatile route fields.
///
/// The index calls `subscribe` when a route is created and `unsubscribe`
/// when it is deleted. Incoming values must be applied with
/// [`RouteIndex::update_last_used`] / [`RouteIndex::update_is_running`],
/// which never publish, so replicas do not echo each other forever.
pub trait RouteReplication: Send + Sync {
    fn subscribe(&self, id: &str, index: &RouteIndex);
    fn unsubscribe(&self, id: &str);
    fn publish_last_used(&self, id: &str, last_used: u64);
    fn publish_is_running(&self, id: &str, is_running: bool);
}
