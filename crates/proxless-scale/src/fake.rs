//! In-memory [`ClusterScaler`].
//!
//! Records every call and keeps a replica count per deployment. Failure and
//! latency can be switched on at runtime. Backs `--cluster noop` and the
//! tests of everything above the cluster seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use proxless_core::DeploymentKey;
use tracing::info;

use crate::cluster::{ClusterScaler, ScaleFuture};
use crate::error::ScaleError;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleCall {
    Up(DeploymentKey),
    Down(DeploymentKey),
}

#[derive(Default)]
pub struct FakeCluster {
    replicas: Mutex<HashMap<DeploymentKey, u32>>,
    calls: Mutex<Vec<ScaleCall>>,
    fail_scale_up: AtomicBool,
    fail_scale_down: AtomicBool,
    latency: Mutex<Duration>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `latency` before answering.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    pub fn set_fail_scale_up(&self, fail: bool) {
        self.fail_scale_up.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_scale_down(&self, fail: bool) {
        self.fail_scale_down.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ScaleCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn scale_up_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ScaleCall::Up(_)))
            .count()
    }

    pub fn scale_down_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ScaleCall::Down(_)))
            .count()
    }

    /// Current replica count (0 for deployments never scaled).
    pub fn replicas(&self, deployment: &str, namespace: &str) -> u32 {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&DeploymentKey::new(deployment, namespace))
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, call: ScaleCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn set_replicas(&self, key: DeploymentKey, replicas: u32) {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, replicas);
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClusterScaler for FakeCluster {
    fn scale_up<'a>(
        &'a self,
        deployment: &'a str,
        namespace: &'a str,
        timeout: Duration,
    ) -> ScaleFuture<'a> {
        Box::pin(async move {
            let key = DeploymentKey::new(deployment, namespace);
            self.record(ScaleCall::Up(key.clone()));
            info!(deployment = %key, timeout_secs = timeout.as_secs(), "fake cluster: scale up");

            let latency = self.latency();
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ScaleError::Timeout {
                    operation: "readiness wait",
                    deployment: key.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(latency).await;

            if self.fail_scale_up.load(Ordering::SeqCst) {
                return Err(ScaleError::ScaleUp {
                    deployment: key.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            self.set_replicas(key, 1);
            Ok(())
        })
    }

    fn scale_down<'a>(&'a self, deployment: &'a str, namespace: &'a str) -> ScaleFuture<'a> {
        Box::pin(async move {
            let key = DeploymentKey::new(deployment, namespace);
            self.record(ScaleCall::Down(key.clone()));
            info!(deployment = %key, "fake cluster: scale down");

            tokio::time::sleep(self.latency()).await;

            if self.fail_scale_down.load(Ordering::SeqCst) {
                return Err(ScaleError::ScaleDown {
                    deployment: key.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            self.set_replicas(key, 0);
            Ok(())
        })
    }
}
