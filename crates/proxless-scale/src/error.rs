//! Error types for cluster scaling.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for scale operations.
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Errors surfaced by the cluster capability and the scale controller.
///
/// `deployment` is always rendered as `name.namespace`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScaleError {
    #[error("scale up of {deployment} failed: {reason}")]
    ScaleUp { deployment: String, reason: String },

    #[error("scale down of {deployment} failed: {reason}")]
    ScaleDown { deployment: String, reason: String },

    #[error("{operation} of {deployment} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        deployment: String,
        timeout: Duration,
    },

    #[error("cluster api error: {0}")]
    Api(String),
}
