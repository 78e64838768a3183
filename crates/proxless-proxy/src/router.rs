//! Per-request routing: domain lookup, forwarding, scale-up on demand.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use proxless_core::{Route, epoch_secs};
use proxless_scale::ScaleController;
use proxless_state::{RouteIndex, StateError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::forward::{Forwarder, OutboundRequest};
use crate::host::request_host;

/// Body returned for every delivery failure.
pub const SERVER_ERROR_BODY: &str = "Error in the server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Delay between forward attempts while another request is scaling
    /// the backend up.
    pub poll_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct RequestRouter {
    index: RouteIndex,
    scaler: Arc<ScaleController>,
    forwarder: Arc<dyn Forwarder>,
    config: RouterConfig,
}

impl RequestRouter {
    pub fn new(
        index: RouteIndex,
        scaler: Arc<ScaleController>,
        forwarder: Arc<dyn Forwarder>,
        config: RouterConfig,
    ) -> Self {
        Self {
            index,
            scaler,
            forwarder,
            config,
        }
    }

    /// Serve one inbound request. Never fails: every error becomes a 404
    /// (unknown domain) or a 500.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let host = request_host(&req).unwrap_or_default();
        let route = match self.index.get_by_domain(&host) {
            Ok(route) => route,
            Err(_) => {
                warn!(host = %host, "no route for domain");
                return not_found(&host);
            }
        };

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = ProxyError::RequestBody(e.to_string());
                warn!(route_id = %route.id, error = %err, "dropping request");
                return server_error();
            }
        };
        let outbound = OutboundRequest::from_parts(parts, body);

        self.mark_used(&route);
        let result = self.deliver(&route, &outbound).await;
        self.mark_used(&route);

        match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(route_id = %route.id, host = %host, error = %e, "request failed");
                server_error()
            }
        }
    }

    /// Forward, and on failure bring the backend up (or wait for whoever
    /// is already doing so) and try again.
    async fn deliver(
        &self,
        route: &Route,
        request: &OutboundRequest,
    ) -> ProxyResult<Response<Full<Bytes>>> {
        let origin = route.origin();
        match self.forwarder.forward(&origin, request).await {
            Ok(resp) => return Ok(resp),
            Err(e) => debug!(route_id = %route.id, error = %e, "forward failed"),
        }

        let timeout = route.effective_readiness_timeout(&self.index.defaults());
        if self.index.begin_scale_up(&route.id)? {
            info!(route_id = %route.id, "backend down; claimed scale up");
            // The running flag stays set on failure: the idle sweep scales
            // the deployment back down once the TTL passes.
            self.scaler.ensure_up(route, timeout).await?;
            Ok(self.forwarder.forward(&origin, request).await?)
        } else {
            debug!(route_id = %route.id, "scale up in progress elsewhere; polling");
            self.poll_until_ready(route, &origin, request, timeout).await
        }
    }

    async fn poll_until_ready(
        &self,
        route: &Route,
        origin: &str,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> ProxyResult<Response<Full<Bytes>>> {
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ProxyError::ReadinessTimeout {
                    route_id: route.id.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;

            match tokio::time::timeout_at(deadline, self.forwarder.forward(origin, request)).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(e)) => debug!(route_id = %route.id, error = %e, "backend not ready yet"),
                Err(_) => {}
            }
        }
    }

    fn mark_used(&self, route: &Route) {
        match self.index.mark_used(&route.id, epoch_secs()) {
            Ok(()) => {}
            Err(StateError::NotFound(_)) => debug!(route_id = %route.id, "route deleted mid-request"),
            Err(e) => warn!(route_id = %route.id, error = %e, "cannot record last use"),
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

fn not_found(host: &str) -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, format!("Domain {host} not found"))
}

fn server_error() -> Response<Full<Bytes>> {
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        SERVER_ERROR_BODY.to_string(),
    )
}
