//! Error types for forwarding and request routing.

use std::time::Duration;

use proxless_scale::ScaleError;
use proxless_state::StateError;
use thiserror::Error;

/// Result type alias for a single forward attempt.
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Transport-level failure delivering a request to a backend.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot connect to {origin}: {reason}")]
    Connect { origin: String, reason: String },

    #[error("request to {origin} failed: {reason}")]
    Request { origin: String, reason: String },

    #[error("reading response body from {origin} failed: {reason}")]
    Body { origin: String, reason: String },

    #[error("request to {origin} timed out after {timeout:?}")]
    Timeout { origin: String, timeout: Duration },
}

/// Result type alias for request routing.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Why a request could not be delivered.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("domain {0} not found")]
    DomainNotFound(String),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Scale(#[from] ScaleError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("backend of route {route_id} not ready after {timeout:?}")]
    ReadinessTimeout { route_id: String, timeout: Duration },

    #[error("reading request body failed: {0}")]
    RequestBody(String),
}

/// Render an error with its source chain, `outer: inner: ...`.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
