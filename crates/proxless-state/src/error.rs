//! Error types for route index operations.

use thiserror::Error;

/// Result type alias for route index operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur when reading or mutating the route index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Malformed route data. Nothing was written.
    #[error("invalid route: {0}")]
    Validation(String),

    /// A deployment key or domain already belongs to another route.
    #[error("{key} is already owned by route {owner}")]
    OwnershipConflict { key: String, owner: String },

    #[error("route {0} not found")]
    NotFound(String),
}
