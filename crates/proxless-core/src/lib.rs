//! proxless-core — shared types for the Proxless scale-to-zero proxy.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the discovery-facing [`RouteSpec`], the index-resident [`Route`],
//! and the global [`RouteDefaults`] that per-route overrides fall back to.
//!
//! The [`supervisor`] module provides the restart guard used by every
//! process-lifetime background loop (idle sweep, discovery).

pub mod clock;
pub mod supervisor;
pub mod types;

pub use clock::epoch_secs;
pub use supervisor::{supervise, wait_for_shutdown};
pub use types::*;
