//! Routes file source.
//!
//! ```toml
//! [[routes]]
//! id = "web"
//! service = "web"
//! port = 8080
//! deployment = "web"
//! namespace = "apps"
//! domains = ["web.example.com"]
//! ttl_seconds = 120
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use proxless_core::{RouteId, RouteSpec, wait_for_shutdown};
use proxless_state::{RouteSink, StateError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, DiscoveryResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutesFile {
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl RoutesFile {
    pub fn parse(content: &str) -> DiscoveryResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> DiscoveryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }
}

/// Outcome of one [`FileDiscovery::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub upserted: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Keeps the index in line with a routes file.
///
/// Only routes this source installed are ever deleted, so it can share
/// the index with other discovery feeds.
pub struct FileDiscovery {
    path: PathBuf,
    sink: Arc<dyn RouteSink>,
    installed: Mutex<HashSet<RouteId>>,
}

impl FileDiscovery {
    pub fn new(path: impl Into<PathBuf>, sink: Arc<dyn RouteSink>) -> Self {
        Self {
            path: path.into(),
            sink,
            installed: Mutex::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert every entry and delete routes that vanished from the file.
    ///
    /// An unreadable or malformed file changes nothing. Entries the index
    /// rejects are counted in `failed` and logged.
    pub fn sync(&self) -> DiscoveryResult<SyncStats> {
        let file = RoutesFile::from_file(&self.path)?;
        let mut installed = self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut stats = SyncStats::default();
        let mut present = HashSet::with_capacity(file.routes.len());

        for spec in file.routes {
            let id = spec.id.clone();
            present.insert(id.clone());
            match self.sink.upsert(spec) {
                Ok(()) => {
                    stats.upserted += 1;
                    installed.insert(id);
                }
                Err(e @ StateError::OwnershipConflict { .. }) => {
                    stats.failed += 1;
                    warn!(route_id = %id, error = %e, "route rejected");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(route_id = %id, error = %e, "invalid route entry");
                }
            }
        }

        let stale: Vec<RouteId> = installed.difference(&present).cloned().collect();
        for id in stale {
            match self.sink.delete(&id) {
                Ok(()) | Err(StateError::NotFound(_)) => {
                    stats.deleted += 1;
                    installed.remove(&id);
                    debug!(route_id = %id, "route removed from file");
                }
                Err(e) => warn!(route_id = %id, error = %e, "cannot remove route"),
            }
        }

        Ok(stats)
    }

    /// Sync now, then every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), interval_secs = interval.as_secs(), "file discovery started");

        loop {
            match self.sync() {
                Ok(stats) if stats != SyncStats::default() => debug!(
                    upserted = stats.upserted,
                    deleted = stats.deleted,
                    failed = stats.failed,
                    "routes file synced"
                ),
                Ok(_) => {}
                Err(e) => warn!(path = %self.path.display(), error = %e, "routes file sync failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("file discovery shutting down");
                    break;
                }
            }
        }
    }
}
