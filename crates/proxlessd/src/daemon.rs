//! Subsystem assembly and process lifetime.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kube::Client;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use proxless_core::{supervise, wait_for_shutdown};
use proxless_discovery::{FileDiscovery, ServiceInformer};
use proxless_pubsub::{RedisConfig, RedisPubSub, StateReplicator};
use proxless_proxy::{HttpForwarder, RequestRouter, serve_listener};
use proxless_scale::{ClusterScaler, DeploymentScaler, FakeCluster, ScaleController};
use proxless_state::RouteIndex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, ClusterBackend};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("proxless daemon starting");

    // ── Route index ────────────────────────────────────────────

    let defaults = cli.route_defaults();
    let index = match &cli.redis_url {
        Some(url) => {
            let pubsub = RedisPubSub::start(RedisConfig::new(url.as_str()))
                .context("invalid --redis-url")?;
            info!(addr = %pubsub.addr(), "route state replicated through redis");
            let replicator = StateReplicator::new(Arc::new(pubsub));
            RouteIndex::replicated(defaults, Arc::new(replicator))
        }
        None => RouteIndex::with_defaults(defaults),
    };
    info!(
        ttl_secs = defaults.ttl_seconds,
        readiness_timeout_secs = defaults.readiness_timeout_seconds,
        "route index initialized"
    );

    // ── Scaling ────────────────────────────────────────────────

    let cluster_client = match cli.cluster {
        ClusterBackend::Kubernetes => Some(kube_client(cli.kubeconfig.as_deref()).await?),
        ClusterBackend::Noop => None,
    };
    let cluster: Arc<dyn ClusterScaler> = match &cluster_client {
        Some(client) => Arc::new(DeploymentScaler::new(
            client.clone(),
            cli.deployment_scaler_config(),
        )),
        None => {
            warn!("cluster backend is noop; deployments are never scaled");
            Arc::new(FakeCluster::new())
        }
    };
    let controller = Arc::new(ScaleController::new(
        index.clone(),
        cluster,
        cli.scale_config(),
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let sweep_handle = {
        let controller = controller.clone();
        let rx = shutdown_rx.clone();
        let interval = cli.check_interval();
        tokio::spawn(supervise("idle-sweep", shutdown_rx.clone(), move || {
            let controller = controller.clone();
            let rx = rx.clone();
            async move { controller.run_idle_sweep(interval, rx).await }
        }))
    };

    let discovery_handle = cli.routes_file.as_ref().map(|path| {
        let discovery = Arc::new(FileDiscovery::new(path, Arc::new(index.clone())));
        let rx = shutdown_rx.clone();
        let interval = cli.routes_reload_interval();
        tokio::spawn(supervise("file-discovery", shutdown_rx.clone(), move || {
            let discovery = discovery.clone();
            let rx = rx.clone();
            async move { discovery.run(interval, rx).await }
        }))
    });

    let informer_handle = cluster_client.map(|client| {
        let informer = Arc::new(ServiceInformer::new(
            client,
            cli.namespace.as_deref(),
            Arc::new(index.clone()),
        ));
        let rx = shutdown_rx.clone();
        tokio::spawn(supervise("service-discovery", shutdown_rx.clone(), move || {
            let informer = informer.clone();
            let rx = rx.clone();
            async move { informer.run(rx).await }
        }))
    });

    // ── API server ─────────────────────────────────────────────

    let api_handle = if cli.api_port == 0 {
        info!("admin API disabled");
        None
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.api_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind admin API on {addr}"))?;
        info!(%addr, "admin API listening");

        let mut rx = shutdown_rx.clone();
        let server = axum::serve(listener, proxless_api::build_router(index.clone()))
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut rx).await });
        Some(tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "admin API server error");
            }
        }))
    };

    // ── Proxy ──────────────────────────────────────────────────

    let router = Arc::new(RequestRouter::new(
        index,
        controller,
        Arc::new(HttpForwarder::new(cli.forwarder_config())),
        cli.router_config(),
    ));
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind proxy on {addr}"))?;
    let mut proxy_handle = tokio::spawn(serve_listener(listener, router, shutdown_rx.clone()));

    let outcome = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("shutdown signal received");
            Ok(())
        }
        result = &mut proxy_handle => match result {
            Ok(Ok(())) => Err(anyhow::anyhow!("proxy server stopped unexpectedly")),
            Ok(Err(e)) => Err(e.context("proxy server failed")),
            Err(e) => Err(anyhow::anyhow!("proxy server task failed: {e}")),
        },
    };

    let _ = shutdown_tx.send(true);

    if !proxy_handle.is_finished() {
        let _ = proxy_handle.await;
    }
    let _ = sweep_handle.await;
    if let Some(handle) = informer_handle {
        let _ = handle.await;
    }
    if let Some(handle) = discovery_handle {
        let _ = handle.await;
    }
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    info!("proxless daemon stopped");
    outcome
}

/// Client from `kubeconfig` when given, otherwise the in-cluster or
/// default configuration.
async fn kube_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("invalid kubeconfig")?
        }
        None => Config::infer()
            .await
            .context("no kubernetes configuration found")?,
    };
    info!(cluster_url = %config.cluster_url, "kubernetes client configured");
    Client::try_from(config).context("failed to create kubernetes client")
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C"),
            _ = term.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")
    }
}
