//! Discovery feeds for the route index.
//!
//! Discovery never touches the index directly: every adapter here writes
//! through [`proxless_state::RouteSink`].
//!
//! - [`service`] converts annotated cluster services into route specs and
//!   applies add/update/delete events.
//! - [`informer`] watches services through the Kubernetes API and feeds
//!   those events.
//! - [`file`] keeps the index in sync with a TOML routes file.

pub mod error;
pub mod file;
pub mod informer;
pub mod service;

pub use error::{DiscoveryError, DiscoveryResult};
pub use file::{FileDiscovery, RoutesFile, SyncStats};
pub use informer::{ServiceInformer, ServiceTracker, service_meta};
pub use service::{
    ANNOTATION_DEPLOYMENT, ANNOTATION_DOMAINS, ANNOTATION_READINESS_TIMEOUT_SECONDS,
    ANNOTATION_TTL_SECONDS, EventOutcome, ServiceEvent, ServiceMeta, apply_event, gen_domains,
    route_id,
};
