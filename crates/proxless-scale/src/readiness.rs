//! Bounded readiness polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{ScaleError, ScaleResult};

/// Poll `check` until it reports ready, it fails, or `timeout` elapses.
///
/// The first check runs immediately; later ones every `interval`. A check
/// error ends the wait with that error.
pub async fn wait_for_ready<F, Fut>(
    deployment: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> ScaleResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScaleResult<bool>>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if check().await? {
            debug!(
                deployment,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "deployment ready"
            );
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ScaleError::Timeout {
                operation: "readiness wait",
                deployment: deployment.to_string(),
                timeout,
            });
        }
        debug!(deployment, "deployment not ready yet");
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
