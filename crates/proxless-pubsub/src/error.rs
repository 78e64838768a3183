//! Error types for the replication transports.

use thiserror::Error;

/// Result type alias for transport operations.
pub type PubSubResult<T> = Result<T, PubSubError>;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("transport closed: {0}")]
    Closed(String),
}
