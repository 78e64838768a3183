//! The cluster capability the controller drives.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ScaleResult;

/// Boxed future returned by [`ClusterScaler`] methods.
pub type ScaleFuture<'a> = Pin<Box<dyn Future<Output = ScaleResult<()>> + Send + 'a>>;

/// Changes the replica count of a deployment.
///
/// Implementations must be safe to call concurrently for different
/// deployments.
pub trait ClusterScaler: Send + Sync {
    /// Set replicas to at least one and wait until one is available,
    /// for at most `timeout`.
    fn scale_up<'a>(
        &'a self,
        deployment: &'a str,
        namespace: &'a str,
        timeout: Duration,
    ) -> ScaleFuture<'a>;

    /// Set replicas to zero.
    fn scale_down<'a>(&'a self, deployment: &'a str, namespace: &'a str) -> ScaleFuture<'a>;
}
