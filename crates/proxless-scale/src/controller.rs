//! Scale controller — on-demand scale-up and the idle sweep.

use std::sync::Arc;
use std::time::Duration;

use proxless_core::{Route, epoch_secs, wait_for_shutdown};
use proxless_state::{RouteIndex, StateError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::cluster::ClusterScaler;
use crate::error::{ScaleError, ScaleResult};

/// Bounds for cluster calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Upper bound for one scale-down call.
    pub scale_down_timeout: Duration,
    /// Slack added to the readiness budget before a scale-up is cut off, so
    /// the cluster's own timeout error normally surfaces first.
    pub scale_up_grace: Duration,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            scale_down_timeout: Duration::from_secs(30),
            scale_up_grace: Duration::from_secs(1),
        }
    }
}

/// Outcome of one idle sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Running routes found idle beyond their TTL.
    pub idle: usize,
    pub scaled_down: usize,
    pub failed: usize,
}

pub struct ScaleController {
    index: RouteIndex,
    cluster: Arc<dyn ClusterScaler>,
    config: ScaleConfig,
}

impl ScaleController {
    pub fn new(index: RouteIndex, cluster: Arc<dyn ClusterScaler>, config: ScaleConfig) -> Self {
        Self {
            index,
            cluster,
            config,
        }
    }

    pub fn index(&self) -> &RouteIndex {
        &self.index
    }

    /// Bring the route's deployment to at least one available replica
    /// within `timeout`. Does not retry.
    pub async fn ensure_up(&self, route: &Route, timeout: Duration) -> ScaleResult<()> {
        let key = route.deployment_key();
        let started = Instant::now();
        info!(route_id = %route.id, deployment = %key, timeout_secs = timeout.as_secs(), "scaling up");

        let bound = timeout + self.config.scale_up_grace;
        let result = match tokio::time::timeout(
            bound,
            self.cluster
                .scale_up(&route.deployment, &route.namespace, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScaleError::Timeout {
                operation: "scale up",
                deployment: key.to_string(),
                timeout: bound,
            }),
        };

        match &result {
            Ok(()) => info!(
                route_id = %route.id,
                deployment = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "deployment scaled up"
            ),
            Err(e) => error!(route_id = %route.id, deployment = %key, error = %e, "scale up failed"),
        }
        result
    }

    /// One sweep tick: scale down every running route idle at `now`.
    ///
    /// A successful scale-down clears the running flag (and publishes it);
    /// a failed one leaves the route untouched for the next tick.
    pub async fn scale_down_idle(&self, now: u64) -> SweepStats {
        let idle = self.index.list_idle_beyond(now);
        let mut stats = SweepStats {
            idle: idle.len(),
            ..SweepStats::default()
        };

        for route in idle {
            match self.scale_down(&route).await {
                Ok(()) => {
                    stats.scaled_down += 1;
                    match self.index.mark_running(&route.id, false) {
                        Ok(()) => {}
                        Err(StateError::NotFound(_)) => {
                            debug!(route_id = %route.id, "route deleted during scale down");
                        }
                        Err(e) => error!(route_id = %route.id, error = %e, "cannot clear running flag"),
                    }
                    info!(
                        route_id = %route.id,
                        deployment = %route.deployment_key(),
                        idle_secs = now.saturating_sub(route.last_used),
                        "deployment scaled down"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(route_id = %route.id, error = %e, "scale down failed; retrying next tick");
                }
            }
        }
        stats
    }

    async fn scale_down(&self, route: &Route) -> ScaleResult<()> {
        let timeout = self.config.scale_down_timeout;
        match tokio::time::timeout(
            timeout,
            self.cluster.scale_down(&route.deployment, &route.namespace),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScaleError::Timeout {
                operation: "scale down",
                deployment: route.deployment_key().to_string(),
                timeout,
            }),
        }
    }

    /// Run the idle sweep every `interval` until `shutdown` flips.
    pub async fn run_idle_sweep(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "idle sweep started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let stats = self.scale_down_idle(epoch_secs()).await;
                    if stats.idle > 0 {
                        debug!(
                            idle = stats.idle,
                            scaled_down = stats.scaled_down,
                            failed = stats.failed,
                            "idle sweep tick"
                        );
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("idle sweep shutting down");
                    break;
                }
            }
        }
    }
}
