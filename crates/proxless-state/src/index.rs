//! RouteIndex — concurrent multi-key route table.
//!
//! All three key tables and the routes themselves sit behind one
//! `RwLock`. Lookups take the read lock and hand out clones; mutations take
//! the write lock and never perform I/O while holding it. Replication
//! callbacks run after the lock is released, but under a membership lock
//! that upserts and deletes share, so subscribe and unsubscribe reach the
//! transport in the same order as the table changes they follow.
//!
//! A clone handed out by a lookup is a snapshot: a concurrent
//! `update_last_used` is not reflected in it, but no reader ever observes a
//! half-applied upsert.

use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use proxless_core::{
    DEFAULT_PORT, DeploymentKey, Route, RouteDefaults, RouteId, RouteSpec, epoch_secs,
};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::sink::{RouteReplication, RouteSink};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Default)]
struct Tables {
    routes: HashMap<RouteId, Route>,
    deployments: HashMap<DeploymentKey, RouteId>,
    domains: HashMap<String, RouteId>,
}

impl Tables {
    /// Fail if the deployment key or any domain resolves to a different id.
    fn check_ownership(&self, id: &str, key: &DeploymentKey, domains: &[String]) -> StateResult<()> {
        if let Some(owner) = self.deployments.get(key)
            && owner != id
        {
            return Err(StateError::OwnershipConflict {
                key: format!("deployment {key}"),
                owner: owner.clone(),
            });
        }
        for domain in domains {
            if let Some(owner) = self.domains.get(domain)
                && owner != id
            {
                return Err(StateError::OwnershipConflict {
                    key: format!("domain {domain}"),
                    owner: owner.clone(),
                });
            }
        }
        Ok(())
    }

    /// Drop keys the route no longer claims and install the ones it now does.
    fn migrate_keys(&mut self, id: &str, old: &Route, new_key: &DeploymentKey, new_domains: &[String]) {
        let old_key = old.deployment_key();
        if &old_key != new_key {
            self.remove_deployment_key(id, &old_key);
        }
        self.deployments.insert(new_key.clone(), id.to_string());

        let keep: HashSet<&String> = new_domains.iter().collect();
        for domain in old.domains.iter().filter(|d| !keep.contains(d)) {
            self.remove_domain(id, domain);
        }
        for domain in new_domains {
            self.domains.insert(domain.clone(), id.to_string());
        }
    }

    fn install_keys(&mut self, route: &Route) {
        self.deployments
            .insert(route.deployment_key(), route.id.clone());
        for domain in &route.domains {
            self.domains.insert(domain.clone(), route.id.clone());
        }
    }

    fn remove_deployment_key(&mut self, id: &str, key: &DeploymentKey) {
        if self.deployments.get(key).is_some_and(|owner| owner == id) {
            self.deployments.remove(key);
        }
    }

    fn remove_domain(&mut self, id: &str, domain: &str) {
        if self.domains.get(domain).is_some_and(|owner| owner == id) {
            self.domains.remove(domain);
        }
    }

    fn route_mut(&mut self, id: &str) -> StateResult<&mut Route> {
        self.routes
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    fn resolve(&self, owner: Option<&RouteId>, key: &str) -> StateResult<Route> {
        owner
            .and_then(|id| self.routes.get(id))
            .cloned()
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }
}

struct Inner {
    tables: RwLock<Tables>,
    /// Held by upsert and delete across the table change and the
    /// replication call that follows it.
    membership: Mutex<()>,
    defaults: RouteDefaults,
    replication: Option<Arc<dyn RouteReplication>>,
}

/// Thread-safe route index. Cloning shares the same table.
#[derive(Clone)]
pub struct RouteIndex {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`RouteIndex`], for listeners that must not keep
/// the index alive.
#[derive(Clone)]
pub struct WeakRouteIndex {
    inner: Weak<Inner>,
}

impl WeakRouteIndex {
    pub fn upgrade(&self) -> Option<RouteIndex> {
        self.inner.upgrade().map(|inner| RouteIndex { inner })
    }
}

impl RouteIndex {
    /// Empty index with the default TTL and readiness budget.
    pub fn new() -> Self {
        Self::with_defaults(RouteDefaults::default())
    }

    /// Empty index with explicit global defaults and no replication.
    pub fn with_defaults(defaults: RouteDefaults) -> Self {
        Self::build(defaults, None)
    }

    /// Empty index whose volatile fields are mirrored through `replication`.
    pub fn replicated(defaults: RouteDefaults, replication: Arc<dyn RouteReplication>) -> Self {
        Self::build(defaults, Some(replication))
    }

    fn build(defaults: RouteDefaults, replication: Option<Arc<dyn RouteReplication>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                membership: Mutex::new(()),
                defaults,
                replication,
            }),
        }
    }

    pub fn defaults(&self) -> RouteDefaults {
        self.inner.defaults
    }

    pub fn downgrade(&self) -> WeakRouteIndex {
        WeakRouteIndex {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn membership(&self) -> MutexGuard<'_, ()> {
        self.inner
            .membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Discovery entry points ─────────────────────────────────────

    /// Create a route, or update the route with the same id in place.
    ///
    /// Rejected without any change when a required field is empty or when
    /// the deployment key or a domain belongs to another route.
    pub fn upsert(&self, spec: RouteSpec) -> StateResult<UpsertOutcome> {
        let spec = normalize(spec)?;
        let id = spec.id.clone();
        let key = spec.deployment_key();

        let _membership = self.membership();
        let outcome = {
            let mut tables = self.write();
            tables.check_ownership(&spec.id, &key, &spec.domains)?;

            match tables.routes.remove(&spec.id) {
                Some(mut route) => {
                    tables.migrate_keys(&spec.id, &route, &key, &spec.domains);
                    route.service = spec.service;
                    route.port = spec.port.unwrap_or(DEFAULT_PORT);
                    route.deployment = spec.deployment;
                    route.namespace = spec.namespace;
                    route.domains = spec.domains;
                    route.ttl_seconds = spec.ttl_seconds;
                    route.readiness_timeout_seconds = spec.readiness_timeout_seconds;
                    if let Some(is_running) = spec.is_running {
                        route.is_running = is_running;
                    }
                    debug!(
                        route_id = %route.id,
                        deployment = %key,
                        domains = ?route.domains,
                        "route updated"
                    );
                    tables.routes.insert(route.id.clone(), route);
                    UpsertOutcome::Updated
                }
                None => {
                    let route = Route {
                        id: spec.id,
                        service: spec.service,
                        port: spec.port.unwrap_or(DEFAULT_PORT),
                        deployment: spec.deployment,
                        namespace: spec.namespace,
                        domains: spec.domains,
                        last_used: epoch_secs(),
                        is_running: spec.is_running.unwrap_or(false),
                        ttl_seconds: spec.ttl_seconds,
                        readiness_timeout_seconds: spec.readiness_timeout_seconds,
                    };
                    tables.install_keys(&route);
                    debug!(
                        route_id = %route.id,
                        deployment = %key,
                        domains = ?route.domains,
                        "route created"
                    );
                    tables.routes.insert(route.id.clone(), route);
                    UpsertOutcome::Created
                }
            }
        };

        if outcome == UpsertOutcome::Created
            && let Some(replication) = &self.inner.replication
        {
            replication.subscribe(&id, self);
        }

        Ok(outcome)
    }

    /// Remove a route and every key that points at it.
    pub fn delete(&self, id: &str) -> StateResult<Route> {
        let _membership = self.membership();
        let route = {
            let mut tables = self.write();
            let route = tables
                .routes
                .remove(id)
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;
            tables.remove_deployment_key(id, &route.deployment_key());
            for domain in &route.domains {
                tables.remove_domain(id, domain);
            }
            route
        };

        debug!(route_id = %id, "route deleted");
        if let Some(replication) = &self.inner.replication {
            replication.unsubscribe(id);
        }
        Ok(route)
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn get_by_id(&self, id: &str) -> StateResult<Route> {
        let tables = self.read();
        tables
            .routes
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Resolve a hostname. Case and surrounding whitespace are ignored.
    pub fn get_by_domain(&self, domain: &str) -> StateResult<Route> {
        let domain = normalize_domain(domain);
        let tables = self.read();
        tables.resolve(tables.domains.get(&domain), &domain)
    }

    pub fn get_by_deployment(&self, deployment: &str, namespace: &str) -> StateResult<Route> {
        let key = DeploymentKey::new(deployment, namespace);
        let tables = self.read();
        tables.resolve(tables.deployments.get(&key), &key.to_string())
    }

    /// Snapshot of every route, ordered by id.
    pub fn list(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.read().routes.values().cloned().collect();
        routes.sort_by(|a, b| a.id.cmp(&b.id));
        routes
    }

    pub fn len(&self) -> usize {
        self.read().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running routes whose idle time at `now` reached their effective TTL.
    pub fn list_idle_beyond(&self, now: u64) -> Vec<Route> {
        let defaults = self.inner.defaults;
        self.read()
            .routes
            .values()
            .filter(|route| route.is_running && route.is_idle_at(now, &defaults))
            .cloned()
            .collect()
    }

    // ── Volatile state ─────────────────────────────────────────────

    /// Apply a last-used timestamp locally. Older values are ignored.
    pub fn update_last_used(&self, id: &str, last_used: u64) -> StateResult<()> {
        let mut tables = self.write();
        let route = tables.route_mut(id)?;
        route.last_used = route.last_used.max(last_used);
        Ok(())
    }

    /// Apply a running flag locally.
    pub fn update_is_running(&self, id: &str, is_running: bool) -> StateResult<()> {
        let mut tables = self.write();
        tables.route_mut(id)?.is_running = is_running;
        Ok(())
    }

    /// [`update_last_used`](Self::update_last_used) and publish to other replicas.
    pub fn mark_used(&self, id: &str, last_used: u64) -> StateResult<()> {
        self.update_last_used(id, last_used)?;
        if let Some(replication) = &self.inner.replication {
            replication.publish_last_used(id, last_used);
        }
        Ok(())
    }

    /// [`update_is_running`](Self::update_is_running) and publish to other replicas.
    pub fn mark_running(&self, id: &str, is_running: bool) -> StateResult<()> {
        self.update_is_running(id, is_running)?;
        if let Some(replication) = &self.inner.replication {
            replication.publish_is_running(id, is_running);
        }
        Ok(())
    }

    /// Claim the right to scale a route up.
    ///
    /// Returns `true` and sets the running flag when it was clear; returns
    /// `false` when another caller already holds the claim. The claim is
    /// published like [`mark_running`](Self::mark_running).
    pub fn begin_scale_up(&self, id: &str) -> StateResult<bool> {
        let claimed = {
            let mut tables = self.write();
            let route = tables.route_mut(id)?;
            if route.is_running {
                false
            } else {
                route.is_running = true;
                true
            }
        };

        if claimed && let Some(replication) = &self.inner.replication {
            replication.publish_is_running(id, true);
        }
        Ok(claimed)
    }
}

impl Default for RouteIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteSink for RouteIndex {
    fn upsert(&self, spec: RouteSpec) -> StateResult<()> {
        RouteIndex::upsert(self, spec).map(|_| ())
    }

    fn delete(&self, id: &str) -> StateResult<()> {
        RouteIndex::delete(self, id).map(|_| ())
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Check required fields and normalize domains (trimmed, lowercase, no
/// duplicates, original order kept).
fn normalize(mut spec: RouteSpec) -> StateResult<RouteSpec> {
    let required = [
        ("id", &spec.id),
        ("service", &spec.service),
        ("deployment", &spec.deployment),
        ("namespace", &spec.namespace),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(StateError::Validation(format!(
                "{field} must not be empty (id = {:?})",
                spec.id
            )));
        }
    }
    if spec.port == Some(0) {
        return Err(StateError::Validation(format!(
            "port must not be 0 (id = {})",
            spec.id
        )));
    }

    let mut seen = HashSet::new();
    let mut domains = Vec::with_capacity(spec.domains.len());
    for raw in &spec.domains {
        let domain = normalize_domain(raw);
        if domain.is_empty() {
            return Err(StateError::Validation(format!(
                "domains must not contain empty entries (id = {})",
                spec.id
            )));
        }
        if seen.insert(domain.clone()) {
            domains.push(domain);
        }
    }
    if domains.is_empty() {
        return Err(StateError::Validation(format!(
            "domains must not be empty (id = {})",
            spec.id
        )));
    }

    spec.domains = domains;
    Ok(spec)
}
