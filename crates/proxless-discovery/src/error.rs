use std::path::PathBuf;

use proxless_state::StateError;
use thiserror::Error;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot read routes file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid routes file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    State(#[from] StateError),
}
