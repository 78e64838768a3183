//! proxless-state — the in-memory route index.
//!
//! The index maps three kinds of keys to one route each:
//!
//! ```text
//! id                      ──┐
//! (deployment, namespace) ──┼──► Route
//! domain (one per alias)  ──┘
//! ```
//!
//! Deployment keys and domains are owned by exactly one route id at a
//! time. An upsert that would steal a key from another route is rejected
//! before anything is written.
//!
//! `RouteIndex` is `Clone` + `Send` + `Sync` (backed by `Arc`) and is shared
//! by the proxy, the scale controller, discovery, and the replicator.

pub mod error;
pub mod index;
pub mod sink;

pub use error::{StateError, StateResult};
pub use index::{RouteIndex, UpsertOutcome, WeakRouteIndex};
pub use sink::{RouteReplication, RouteSink};
