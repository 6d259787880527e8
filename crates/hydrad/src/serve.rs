//! Controller wiring and the API server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use hydra_cluster::{Controller, ControllerSettings, NodeDirectory, discover_cluster};
use hydra_core::HydraConfig;
use hydra_lb::HaproxyClient;
use hydra_registry::{EmbeddedStore, RedisStore, ServiceRegistry};
use hydra_runtime::DockerClient;

pub async fn run(config: HydraConfig) -> anyhow::Result<()> {
    info!("hydra controller starting");

    // ── Container runtime ──────────────────────────────────────

    let docker = Arc::new(DockerClient::new(&config.runtime.socket));
    info!(socket = ?config.runtime.socket, "container runtime client ready");

    let cluster = resolve_cluster(&config, docker.as_ref()).await?;
    info!(%cluster, "cluster identified");

    // ── Registry ───────────────────────────────────────────────

    let registry = match &config.registry.path {
        Some(path) => {
            let store = EmbeddedStore::open(path)
                .with_context(|| format!("opening registry at {}", path.display()))?;
            info!(path = ?path, "embedded registry opened");
            ServiceRegistry::new(store)
        }
        None => {
            let url = config.registry_url(&cluster);
            let store = RedisStore::connect(&url)
                .await
                .with_context(|| format!("connecting to registry at {url}"))?;
            info!(%url, "redis registry connected");
            ServiceRegistry::new(store)
        }
    };

    // ── Controller ─────────────────────────────────────────────

    let lb = HaproxyClient::new(&config.load_balancer.socket);
    let settings = ControllerSettings::from_config(&config, &cluster);
    let controller = Arc::new(Controller::new(
        NodeDirectory::new(docker, cluster.clone()),
        lb,
        registry,
        settings,
    ));

    match controller.public_url().await {
        Ok(url) => info!(%url, "public endpoint"),
        Err(e) => warn!(error = %e, "public endpoint not available yet"),
    }

    // ── API server ─────────────────────────────────────────────

    let router = hydra_api::build_router(controller.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    server.await?;

    controller.shutdown().await;
    info!("hydra controller stopped");
    Ok(())
}

/// Configured cluster name, or the first network of our own container.
async fn resolve_cluster(config: &HydraConfig, docker: &DockerClient) -> anyhow::Result<String> {
    if let Some(name) = &config.cluster.name {
        return Ok(name.clone());
    }
    let own = config
        .cluster
        .self_container
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .context("cluster name not configured and HOSTNAME is unset")?;
    discover_cluster(docker, &own)
        .await
        .with_context(|| format!("discovering cluster from container {own}"))
}
