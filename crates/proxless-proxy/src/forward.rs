//! Delivery of a buffered request to a backend origin.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, HOST, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{ForwardError, ForwardResult, error_chain};

/// Boxed future returned by [`Forwarder::forward`].
pub type ForwardFuture<'a> =
    Pin<Box<dyn Future<Output = ForwardResult<Response<Full<Bytes>>>> + Send + 'a>>;

/// Sends one request to `origin` (`host:port`) and returns the backend's
/// response, whatever its status. Only transport failures are errors.
pub trait Forwarder: Send + Sync {
    fn forward<'a>(&'a self, origin: &'a str, request: &'a OutboundRequest) -> ForwardFuture<'a>;
}

/// Connection-level headers that never cross the proxy.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// An inbound request with its body read into memory, so it can be sent
/// more than once.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub path_and_query: String,
    /// End-to-end headers only; `Host` is set per origin.
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            method: parts.method,
            path_and_query,
            headers,
            body,
        }
    }

    /// Build the request for `origin`, with `Host` set to the origin.
    pub fn to_request(&self, origin: &str) -> ForwardResult<Request<Full<Bytes>>> {
        let invalid = |reason: String| ForwardError::Request {
            origin: origin.to_string(),
            reason,
        };

        let mut req = Request::builder()
            .method(self.method.clone())
            .uri(format!("http://{origin}{}", self.path_and_query))
            .body(Full::new(self.body.clone()))
            .map_err(|e| invalid(e.to_string()))?;
        *req.headers_mut() = self.headers.clone();
        let host = HeaderValue::from_str(origin).map_err(|e| invalid(e.to_string()))?;
        req.headers_mut().insert(HOST, host);
        Ok(req)
    }
}

/// Tuning for the pooled HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct ForwarderConfig {
    /// Idle keep-alive connections kept per origin.
    pub max_idle_per_host: usize,
    pub connect_timeout: Duration,
    /// Bound on one full exchange, response body included.
    pub request_timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10_000,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// [`Forwarder`] over a pooled HTTP/1 client.
pub struct HttpForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    config: ForwarderConfig,
}

impl HttpForwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(connector);

        Self { client, config }
    }

    async fn exchange(
        &self,
        origin: &str,
        request: &OutboundRequest,
    ) -> ForwardResult<Response<Full<Bytes>>> {
        let req = request.to_request(origin)?;
        debug!(origin, method = %request.method, path = %request.path_and_query, "forwarding");

        let resp = self.client.request(req).await.map_err(|e| {
            let reason = error_chain(&e);
            if e.is_connect() {
                ForwardError::Connect {
                    origin: origin.to_string(),
                    reason,
                }
            } else {
                ForwardError::Request {
                    origin: origin.to_string(),
                    reason,
                }
            }
        })?;

        let (mut parts, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ForwardError::Body {
                origin: origin.to_string(),
                reason: error_chain(&e),
            })?
            .to_bytes();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Full::new(body)))
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new(ForwarderConfig::default())
    }
}

impl Forwarder for HttpForwarder {
    fn forward<'a>(&'a self, origin: &'a str, request: &'a OutboundRequest) -> ForwardFuture<'a> {
        Box::pin(async move {
            let timeout = self.config.request_timeout;
            match tokio::time::timeout(timeout, self.exchange(origin, request)).await {
                Ok(result) => result,
                Err(_) => Err(ForwardError::Timeout {
                    origin: origin.to_string(),
                    timeout,
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    fn outbound(path: &str, body: &'static str) -> OutboundRequest {
        let req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, "a.io")
            .header("x-request-id", "42")
            .header(CONNECTION, "keep-alive, x-secret")
            .header("x-secret", "hop")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        OutboundRequest::from_parts(parts, Bytes::from_static(body.as_bytes()))
    }

    /// Backend that echoes the Host header, path and body.
    async fn echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let host = req.headers()[HOST].to_str().unwrap().to_string();
                        let path = req.uri().path().to_string();
                        let secret = req.headers().contains_key("x-secret");
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let text = format!(
                            "{host} {path} {} secret={secret}",
                            String::from_utf8_lossy(&body)
                        );
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(201)
                                .header("x-backend", "echo")
                                .body(Full::new(Bytes::from(text)))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        addr
    }

    #[test]
    fn from_parts_drops_host_and_hop_headers() {
        let req = outbound("/p?q=1", "");
        assert_eq!(req.path_and_query, "/p?q=1");
        assert!(!req.headers.contains_key(HOST));
        assert!(!req.headers.contains_key(CONNECTION));
        assert!(!req.headers.contains_key("x-secret"));
        assert_eq!(req.headers["x-request-id"], "42");
    }

    #[test]
    fn to_request_targets_origin() {
        let req = outbound("/p", "").to_request("svc.ns:8080").unwrap();
        assert_eq!(req.uri().to_string(), "http://svc.ns:8080/p");
        assert_eq!(req.headers()[HOST], "svc.ns:8080");
        assert_eq!(req.method(), Method::POST);
    }

    #[test]
    fn missing_path_defaults_to_root() {
        let req = Request::builder()
            .uri("http://a.io")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let out = OutboundRequest::from_parts(parts, Bytes::new());
        assert_eq!(out.path_and_query, "/");
    }

    #[tokio::test]
    async fn relays_backend_response() {
        let addr = echo_backend().await;
        let origin = addr.to_string();
        let forwarder = HttpForwarder::default();

        let resp = forwarder
            .forward(&origin, &outbound("/hello", "ping"))
            .await
            .unwrap();

        assert_eq!(resp.status(), 201);
        assert_eq!(resp.headers()["x-backend"], "echo");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, format!("{origin} /hello ping secret=false"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let forwarder = HttpForwarder::default();

        let err = forwarder
            .forward(&addr.to_string(), &outbound("/", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Connect { .. }), "got {err:?}");
    }
}
