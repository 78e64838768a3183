//! Proxless scale controller.
//!
//! The only place replica counts change. Scale-ups are requested by the
//! proxy through [`ScaleController::ensure_up`]; scale-downs come from the
//! idle sweep ([`ScaleController::run_idle_sweep`]), which turns routes
//! that have been quiet for their TTL back to zero replicas.
//!
//! The cluster itself sits behind [`ClusterScaler`]: [`DeploymentScaler`]
//! drives a real cluster, [`FakeCluster`] records calls in memory.

pub mod cluster;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod fake;
pub mod readiness;

pub use cluster::{ClusterScaler, ScaleFuture};
pub use controller::{ScaleConfig, ScaleController, SweepStats};
pub use deployment::{DeploymentScaler, DeploymentScalerConfig};
pub use error::{ScaleError, ScaleResult};
pub use fake::{FakeCluster, ScaleCall};
pub use readiness::wait_for_ready;
