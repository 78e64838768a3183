//! [`ClusterScaler`] backed by the Kubernetes API.
//!
//! ```text
//! scale up:    PATCH apps/v1 deployments/<name> {"spec":{"replicas":1}}
//!              GET   apps/v1 deployments/<name>   until status.availableReplicas >= 1
//! scale down:  PATCH apps/v1 deployments/<name> {"spec":{"replicas":0}}
//! ```

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tracing::{debug, info};

use crate::cluster::{ClusterScaler, ScaleFuture};
use crate::error::{ScaleError, ScaleResult};
use crate::readiness::wait_for_ready;

#[derive(Debug, Clone)]
pub struct DeploymentScalerConfig {
    /// Readiness poll interval during scale-up.
    pub poll_interval: Duration,
}

impl Default for DeploymentScalerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Scales `apps/v1` deployments through a shared [`Client`].
pub struct DeploymentScaler {
    client: Client,
    config: DeploymentScalerConfig,
}

impl DeploymentScaler {
    pub fn new(client: Client, config: DeploymentScalerConfig) -> Self {
        Self { client, config }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn set_replicas(&self, deployment: &str, namespace: &str, replicas: i32) -> ScaleResult<()> {
        debug!(deployment, namespace, replicas, "patching deployment replicas");
        self.api(namespace)
            .patch(
                deployment,
                &PatchParams::default(),
                &Patch::Merge(replicas_patch(replicas)),
            )
            .await
            .map(|_| ())
            .map_err(|e| ScaleError::Api(e.to_string()))
    }

    async fn available_replicas(&self, deployment: &str, namespace: &str) -> ScaleResult<i32> {
        let current = self
            .api(namespace)
            .get(deployment)
            .await
            .map_err(|e| ScaleError::Api(e.to_string()))?;
        Ok(available_replicas(&current))
    }

    async fn scale_up_and_wait(
        &self,
        deployment: &str,
        namespace: &str,
        timeout: Duration,
    ) -> ScaleResult<()> {
        let name = format!("{deployment}.{namespace}");
        self.set_replicas(deployment, namespace, 1)
            .await
            .map_err(|e| ScaleError::ScaleUp {
                deployment: name.clone(),
                reason: e.to_string(),
            })?;
        info!(deployment = %name, "replicas set to 1; waiting for availability");

        wait_for_ready(&name, self.config.poll_interval, timeout, move || async move {
            Ok(self.available_replicas(deployment, namespace).await? >= 1)
        })
        .await
    }
}

impl ClusterScaler for DeploymentScaler {
    fn scale_up<'a>(
        &'a self,
        deployment: &'a str,
        namespace: &'a str,
        timeout: Duration,
    ) -> ScaleFuture<'a> {
        Box::pin(self.scale_up_and_wait(deployment, namespace, timeout))
    }

    fn scale_down<'a>(&'a self, deployment: &'a str, namespace: &'a str) -> ScaleFuture<'a> {
        Box::pin(async move {
            self.set_replicas(deployment, namespace, 0)
                .await
                .map_err(|e| ScaleError::ScaleDown {
                    deployment: format!("{deployment}.{namespace}"),
                    reason: e.to_string(),
                })
        })
    }
}

fn replicas_patch(replicas: i32) -> serde_json::Value {
    json!({ "spec": { "replicas": replicas } })
}

/// The API server omits `availableReplicas` when it is zero.
fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or(0)
}
