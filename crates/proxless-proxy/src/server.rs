//! Proxy listener.
//!
//! [`serve_listener`] accepts HTTP/1.1 connections and hands every request to
//! the [`RequestRouter`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use proxless_core::wait_for_shutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::router::RequestRouter;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serve on an already bound listener. One task per connection; requests
/// in flight finish after shutdown, new connections are refused.
pub async fn serve_listener(
    listener: TcpListener,
    router: Arc<RequestRouter>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let local_addr = listener.local_addr().context("listener has no address")?;
    info!(addr = %local_addr, "proxy listening");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, peer_addr) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let router = router.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let router = router.clone();
                        async move { Ok::<_, Infallible>(router.handle(req).await) }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(io, svc)
                        .await
                    {
                        debug!(%peer_addr, error = %e, "connection error");
                    }
                });
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("proxy shutting down");
                break;
            }
        }
    }

    Ok(())
}
