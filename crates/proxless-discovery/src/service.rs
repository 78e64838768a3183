//! Annotated cluster services as a route source.
//!
//! A service is managed when it carries [`ANNOTATION_DEPLOYMENT`]. Its
//! route id is `name.namespace`; its domains are the user-supplied ones
//! plus the in-cluster names generated by [`gen_domains`].

use std::collections::HashMap;

use proxless_core::{RouteId, RouteSpec};
use proxless_state::RouteSink;
use tracing::{debug, warn};

use crate::error::DiscoveryResult;

/// Deployment scaled for this service. Required; marks the service managed.
pub const ANNOTATION_DEPLOYMENT: &str = "proxless/deployment";
/// Comma-separated public domains.
pub const ANNOTATION_DOMAINS: &str = "proxless/domains";
pub const ANNOTATION_TTL_SECONDS: &str = "proxless/ttl-seconds";
pub const ANNOTATION_READINESS_TIMEOUT_SECONDS: &str = "proxless/readiness-timeout-seconds";

/// Suffix of the companion service name a managed service is also
/// reachable under.
const PROXLESS_SUFFIX: &str = "-proxless";

/// The parts of a cluster service discovery cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMeta {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub annotations: HashMap<String, String>,
    /// Target port of the first service port.
    pub target_port: Option<u16>,
}

impl ServiceMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = Some(port);
        self
    }

    pub fn is_managed(&self) -> bool {
        self.annotations.contains_key(ANNOTATION_DEPLOYMENT)
    }

    pub fn route_id(&self) -> RouteId {
        route_id(&self.name, &self.namespace)
    }

    /// Route spec for a managed service, `None` otherwise.
    ///
    /// Unparsable TTL or readiness annotations fall back to the global
    /// defaults.
    pub fn to_spec(&self, namespace_scoped: bool) -> Option<RouteSpec> {
        let deployment = self.annotations.get(ANNOTATION_DEPLOYMENT)?;
        let domains = gen_domains(
            self.annotations
                .get(ANNOTATION_DOMAINS)
                .map(String::as_str)
                .unwrap_or(""),
            &self.name,
            &self.namespace,
            namespace_scoped,
        );

        let mut spec = RouteSpec::new(
            self.route_id(),
            &self.name,
            deployment,
            &self.namespace,
            domains,
        );
        spec.port = self.target_port;
        spec.ttl_seconds = self.seconds_annotation(ANNOTATION_TTL_SECONDS);
        spec.readiness_timeout_seconds =
            self.seconds_annotation(ANNOTATION_READINESS_TIMEOUT_SECONDS);
        Some(spec)
    }

    fn seconds_annotation(&self, key: &str) -> Option<u64> {
        let raw = self.annotations.get(key)?;
        match raw.trim().parse() {
            Ok(secs) => Some(secs),
            Err(_) => {
                warn!(service = %self.route_id(), annotation = key, value = %raw, "ignoring unparsable annotation");
                None
            }
        }
    }
}

/// `name.namespace`, the id of the route backing a service.
pub fn route_id(name: &str, namespace: &str) -> RouteId {
    format!("{name}.{namespace}")
}

/// User domains (comma-separated, blanks skipped) followed by the
/// in-cluster names of the service and its `-proxless` companion. Bare
/// names are added when the proxy only watches one namespace.
pub fn gen_domains(domains: &str, name: &str, namespace: &str, namespace_scoped: bool) -> Vec<String> {
    let companion = format!("{name}{PROXLESS_SUFFIX}");
    let mut out: Vec<String> = domains
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();

    out.push(format!("{name}.{namespace}"));
    out.push(format!("{companion}.{namespace}"));
    out.push(format!("{name}.{namespace}.svc.cluster.local"));
    out.push(format!("{companion}.{namespace}.svc.cluster.local"));

    if namespace_scoped {
        out.push(name.to_string());
        out.push(companion);
    }
    out
}

/// A change to a watched service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Added(ServiceMeta),
    Updated { old: ServiceMeta, new: ServiceMeta },
    Deleted(ServiceMeta),
}

/// What [`apply_event`] did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Upserted(RouteId),
    Deleted(RouteId),
    /// The service is not (and was not) managed.
    Ignored,
}

/// Apply one service event through `sink`.
///
/// | old managed | new managed | action |
/// |---|---|---|
/// | - | yes | upsert (add) |
/// | yes | yes | upsert (update, idempotent) |
/// | yes | no | delete |
/// | no | no | ignore |
pub fn apply_event(
    sink: &dyn RouteSink,
    event: &ServiceEvent,
    namespace_scoped: bool,
) -> DiscoveryResult<EventOutcome> {
    let (old, new) = match event {
        ServiceEvent::Added(svc) => (None, Some(svc)),
        ServiceEvent::Updated { old, new } => (Some(old), Some(new)),
        ServiceEvent::Deleted(svc) => (Some(svc), None),
    };

    if let Some(spec) = new.and_then(|svc| svc.to_spec(namespace_scoped)) {
        let id = spec.id.clone();
        sink.upsert(spec)?;
        debug!(route_id = %id, "service route upserted");
        return Ok(EventOutcome::Upserted(id));
    }

    match old {
        Some(svc) if svc.is_managed() => {
            let id = svc.route_id();
            sink.delete(&id)?;
            debug!(route_id = %id, "service route removed");
            Ok(EventOutcome::Deleted(id))
        }
        _ => Ok(EventOutcome::Ignored),
    }
}
