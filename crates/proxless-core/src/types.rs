//! Route types shared across the proxy, the index, and discovery.
//!
//! A [`RouteSpec`] is what discovery hands in; a [`Route`] is what the index
//! keeps. The two differ in the volatile state (`last_used`, `is_running`)
//! that only the proxy and the idle sweep mutate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque route identifier, assigned by discovery.
pub type RouteId = String;

/// Port used when discovery does not supply one.
pub const DEFAULT_PORT: u16 = 80;

/// Global idle TTL in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 30;

/// Global readiness budget in seconds.
pub const DEFAULT_READINESS_TIMEOUT_SECONDS: u64 = 30;

// ── Deployment key ─────────────────────────────────────────────────

/// Composite `(deployment, namespace)` key of a scalable workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentKey {
    pub deployment: String,
    pub namespace: String,
}

impl DeploymentKey {
    pub fn new(deployment: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.deployment, self.namespace)
    }
}

// ── Defaults ───────────────────────────────────────────────────────

/// Global fallbacks for the per-route TTL and readiness overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefaults {
    pub ttl_seconds: u64,
    pub readiness_timeout_seconds: u64,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            readiness_timeout_seconds: DEFAULT_READINESS_TIMEOUT_SECONDS,
        }
    }
}

// ── Route spec ─────────────────────────────────────────────────────

/// Backend metadata as supplied by discovery.
///
/// Validation and normalization happen in the index, so a spec may be
/// constructed with any values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// May be omitted where the caller supplies it separately (the API
    /// takes it from the path); the index rejects an empty id.
    #[serde(default)]
    pub id: RouteId,
    pub service: String,
    /// Backend port. `None` means [`DEFAULT_PORT`].
    #[serde(default)]
    pub port: Option<u16>,
    pub deployment: String,
    pub namespace: String,
    pub domains: Vec<String>,
    /// Initial running flag. Applied on creation (default `false`) and,
    /// when set, overwrites the flag of an existing route.
    #[serde(default)]
    pub is_running: Option<bool>,
    /// Idle TTL override in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Scale-up wait override in seconds.
    #[serde(default)]
    pub readiness_timeout_seconds: Option<u64>,
}

impl RouteSpec {
    /// Minimal spec with no overrides.
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        deployment: impl Into<String>,
        namespace: impl Into<String>,
        domains: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            port: None,
            deployment: deployment.into(),
            namespace: namespace.into(),
            domains,
            is_running: None,
            ttl_seconds: None,
            readiness_timeout_seconds: None,
        }
    }

    pub fn deployment_key(&self) -> DeploymentKey {
        DeploymentKey::new(&self.deployment, &self.namespace)
    }
}

// ── Route ──────────────────────────────────────────────────────────

/// One routable backend as held by the route index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub service: String,
    pub port: u16,
    pub deployment: String,
    pub namespace: String,
    /// Never empty; every entry is unique across all routes.
    pub domains: Vec<String>,
    /// Unix seconds of the most recent forwarded or attempted request.
    pub last_used: u64,
    /// Set once a scale-up is issued or the backend is known healthy,
    /// cleared once a scale-down succeeds.
    pub is_running: bool,
    pub ttl_seconds: Option<u64>,
    pub readiness_timeout_seconds: Option<u64>,
}

impl Route {
    /// Network target in `service.namespace:port` form.
    pub fn origin(&self) -> String {
        format!("{}.{}:{}", self.service, self.namespace, self.port)
    }

    pub fn deployment_key(&self) -> DeploymentKey {
        DeploymentKey::new(&self.deployment, &self.namespace)
    }

    /// Idle threshold: the route override if set, else the global default.
    pub fn effective_ttl(&self, defaults: &RouteDefaults) -> Duration {
        Duration::from_secs(self.ttl_seconds.unwrap_or(defaults.ttl_seconds))
    }

    /// Scale-up wait budget: the route override if set, else the global default.
    pub fn effective_readiness_timeout(&self, defaults: &RouteDefaults) -> Duration {
        Duration::from_secs(
            self.readiness_timeout_seconds
                .unwrap_or(defaults.readiness_timeout_seconds),
        )
    }

    /// Whether the route has been unused for at least its effective TTL.
    pub fn is_idle_at(&self, now: u64, defaults: &RouteDefaults) -> bool {
        now.saturating_sub(self.last_used) >= self.effective_ttl(defaults).as_secs()
    }
}
