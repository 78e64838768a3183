//! Cluster services as a live route source.
//!
//! [`ServiceInformer`] watches `v1/Service` objects, either cluster-wide or
//! in one namespace, and turns the watch stream into [`ServiceEvent`]s for
//! [`apply_event`]:
//!
//! ```text
//! watcher ──Apply/InitApply──▶ ServiceTracker ──Added/Updated──▶ apply_event ──▶ RouteSink
//!         ──Delete───────────▶                ──Deleted────────▶
//!         ──InitDone─────────▶  (services gone since the last list are Deleted)
//! ```
//!
//! Watch errors are logged and the stream backs off and relists on its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use proxless_core::{RouteId, wait_for_shutdown};
use proxless_state::RouteSink;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::service::{EventOutcome, ServiceEvent, ServiceMeta, apply_event};

/// The parts of a cluster service discovery reads.
pub fn service_meta(service: &Service) -> ServiceMeta {
    let target_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|port| match &port.target_port {
            Some(IntOrString::Int(port)) => u16::try_from(*port).ok(),
            _ => None,
        });

    ServiceMeta {
        uid: service.uid().unwrap_or_default(),
        name: service.name_any(),
        namespace: service.namespace().unwrap_or_default(),
        annotations: service
            .annotations()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        target_port,
    }
}

// ── ServiceTracker ─────────────────────────────────────────────────

/// Remembers the last seen state of every service so watch events can be
/// replayed as add/update/delete transitions.
#[derive(Debug, Default)]
pub struct ServiceTracker {
    known: HashMap<RouteId, ServiceMeta>,
    /// Services seen since the current relist began.
    relisting: Option<HashSet<RouteId>>,
}

impl ServiceTracker {
    pub fn observe(&mut self, event: watcher::Event<Service>) -> Vec<ServiceEvent> {
        match event {
            watcher::Event::Init => {
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(service) => {
                let meta = service_meta(&service);
                if let Some(seen) = &mut self.relisting {
                    seen.insert(meta.route_id());
                }
                vec![self.apply(meta)]
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisting.take() else {
                    return Vec::new();
                };
                let gone: Vec<RouteId> = self
                    .known
                    .keys()
                    .filter(|id| !seen.contains(*id))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|id| self.known.remove(&id))
                    .map(ServiceEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(service) => vec![self.apply(service_meta(&service))],
            watcher::Event::Delete(service) => {
                let meta = service_meta(&service);
                let last = self.known.remove(&meta.route_id()).unwrap_or(meta);
                vec![ServiceEvent::Deleted(last)]
            }
        }
    }

    fn apply(&mut self, meta: ServiceMeta) -> ServiceEvent {
        match self.known.insert(meta.route_id(), meta.clone()) {
            Some(old) => ServiceEvent::Updated { old, new: meta },
            None => ServiceEvent::Added(meta),
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

// ── ServiceInformer ────────────────────────────────────────────────

pub struct ServiceInformer {
    api: Api<Service>,
    sink: Arc<dyn RouteSink>,
    namespace_scoped: bool,
}

impl ServiceInformer {
    /// Watch services in `namespace`, or in every namespace when `None`.
    pub fn new(client: Client, namespace: Option<&str>, sink: Arc<dyn RouteSink>) -> Self {
        let api = match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };
        Self {
            api,
            sink,
            namespace_scoped: namespace.is_some(),
        }
    }

    /// Follow the watch stream until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(namespace_scoped = self.namespace_scoped, "service discovery started");

        let mut tracker = ServiceTracker::default();
        let mut events = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        for change in tracker.observe(event) {
                            self.apply(&change);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "service watch error"),
                    None => {
                        warn!("service watch stream ended");
                        return;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("service discovery shutting down");
                    return;
                }
            }
        }
    }

    fn apply(&self, event: &ServiceEvent) {
        match apply_event(self.sink.as_ref(), event, self.namespace_scoped) {
            Ok(EventOutcome::Ignored) => {}
            Ok(outcome) => debug!(?outcome, "service event applied"),
            Err(e) => warn!(error = %e, "cannot apply service event"),
        }
    }
}
