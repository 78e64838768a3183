//! Command line and environment options.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use proxless_core::RouteDefaults;
use proxless_proxy::{ForwarderConfig, RouterConfig};
use proxless_scale::{DeploymentScalerConfig, ScaleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClusterBackend {
    /// Scale deployments and watch services through the Kubernetes API.
    Kubernetes,
    /// Record scale calls without touching a cluster.
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "proxlessd", about = "Scale-to-zero HTTP proxy", version)]
pub struct Cli {
    /// Proxy listen port.
    #[arg(long, env = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Admin API port; 0 disables the API.
    #[arg(long, env = "API_PORT", default_value_t = 8081)]
    pub api_port: u16,

    /// Idle time after which a deployment is scaled down.
    #[arg(long, env = "SERVERLESS_TTL_SECONDS", default_value_t = 30)]
    pub ttl_seconds: u64,

    /// How long a request waits for a scaled-up backend.
    #[arg(long, env = "READINESS_POLL_TIMEOUT_SECONDS", default_value_t = 30)]
    pub readiness_timeout_seconds: u64,

    #[arg(long, env = "READINESS_POLL_INTERVAL_SECONDS", default_value_t = 1)]
    pub readiness_poll_interval_seconds: u64,

    /// Idle sweep interval.
    #[arg(long, env = "DOWNSCALER_CHECK_INTERVAL_SECONDS", default_value_t = 5)]
    pub check_interval_seconds: u64,

    #[arg(long, env = "SCALE_DOWN_TIMEOUT_SECONDS", default_value_t = 30)]
    pub scale_down_timeout_seconds: u64,

    /// Idle pooled connections kept per backend.
    #[arg(long, env = "MAX_CONS_PER_HOST", default_value_t = 10_000)]
    pub max_cons_per_host: usize,

    /// Share route state with other replicas through Redis.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// TOML routes file to load and watch.
    #[arg(long, env = "ROUTES_FILE")]
    pub routes_file: Option<PathBuf>,

    #[arg(long, env = "ROUTES_RELOAD_SECONDS", default_value_t = 10)]
    pub routes_reload_seconds: u64,

    #[arg(long, env = "CLUSTER_BACKEND", value_enum, default_value_t = ClusterBackend::Kubernetes)]
    pub cluster: ClusterBackend,

    /// Kubeconfig file; in-cluster or default configuration when unset.
    #[arg(long, env = "KUBE_CONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch services in this namespace.
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn route_defaults(&self) -> RouteDefaults {
        RouteDefaults {
            ttl_seconds: self.ttl_seconds,
            readiness_timeout_seconds: self.readiness_timeout_seconds,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_poll_interval_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn routes_reload_interval(&self) -> Duration {
        Duration::from_secs(self.routes_reload_seconds)
    }

    pub fn scale_config(&self) -> ScaleConfig {
        ScaleConfig {
            scale_down_timeout: Duration::from_secs(self.scale_down_timeout_seconds),
            ..ScaleConfig::default()
        }
    }

    pub fn deployment_scaler_config(&self) -> DeploymentScalerConfig {
        DeploymentScalerConfig {
            poll_interval: self.poll_interval(),
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            max_idle_per_host: self.max_cons_per_host,
            ..ForwarderConfig::default()
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            poll_interval: self.poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "proxlessd",
            "--port",
            "8080",
            "--api-port",
            "0",
            "--ttl-seconds",
            "600",
            "--readiness-timeout-seconds",
            "90",
            "--cluster",
            "noop",
            "--log-format",
            "json",
            "--redis-url",
            "redis://cache:6379",
        ])
        .unwrap();

        assert_eq!(cli.port, 8080);
        assert_eq!(cli.api_port, 0);
        assert_eq!(
            cli.route_defaults(),
            RouteDefaults {
                ttl_seconds: 600,
                readiness_timeout_seconds: 90
            }
        );
        assert_eq!(cli.cluster, ClusterBackend::Noop);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn derived_configs() {
        let cli = Cli::try_parse_from([
            "proxlessd",
            "--readiness-poll-interval-seconds",
            "2",
            "--scale-down-timeout-seconds",
            "10",
            "--max-cons-per-host",
            "64",
            "--kubeconfig",
            "/etc/kube/config",
        ])
        .unwrap();

        assert_eq!(cli.router_config().poll_interval, Duration::from_secs(2));
        assert_eq!(
            cli.deployment_scaler_config().poll_interval,
            Duration::from_secs(2)
        );
        assert_eq!(cli.kubeconfig, Some(PathBuf::from("/etc/kube/config")));
        assert_eq!(
            cli.scale_config().scale_down_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(cli.forwarder_config().max_idle_per_host, 64);
    }

    #[test]
    fn kubernetes_backend_is_the_default() {
        let cli = Cli::try_parse_from(["proxlessd", "--namespace", "apps"]).unwrap();
        assert_eq!(cli.cluster, ClusterBackend::Kubernetes);
        assert_eq!(cli.namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn unknown_cluster_backend_is_rejected() {
        assert!(Cli::try_parse_from(["proxlessd", "--cluster", "nomad"]).is_err());
    }
}
