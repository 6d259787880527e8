//! Orchestration controller.
//!
//! Allocates nodes, deploys replicas, and migrates services off failed
//! nodes while keeping the runtime, the registry, and the load balancer in
//! agreement about which node runs which service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use hydra_core::{DeployRequest, HydraConfig, Node, ServiceConfig, ServiceNode};
use hydra_lb::HaproxyClient;
use hydra_registry::ServiceRegistry;
use hydra_runtime::{ContainerInfo, ContainerRuntime, RunSpec, RuntimeEvent};

use crate::directory::NodeDirectory;
use crate::error::{ClusterError, ClusterResult, ReplicaFailure};
use crate::migration::{MigrationOutcome, MigrationReport};
use crate::monitor::{MonitorHandle, MonitorPhase, NodeDownHandler, watch_node};

// ── Allocation lock ───────────────────────────────────────────────

/// Serializes every "read free nodes → place → commit" sequence.
///
/// This lock is process-local. It orders allocations made by this
/// controller only; a second controller process against the same cluster
/// is not excluded and can double-allocate slots.
#[derive(Default)]
pub struct AllocationLock {
    inner: tokio::sync::Mutex<()>,
}

/// Proof that the allocation lock is held.
pub struct AllocationGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl AllocationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> AllocationGuard<'_> {
        AllocationGuard {
            _guard: self.inner.lock().await,
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────

/// Controller settings resolved for one cluster.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub node_image: String,
    pub down_events: Vec<String>,
    /// Load balancer container whose published port is the public endpoint.
    pub lb_container: String,
    pub lb_port: u16,
    /// Fixed public base URL; skips discovery when set.
    pub public_url: Option<String>,
}

impl ControllerSettings {
    pub fn from_config(config: &HydraConfig, cluster: &str) -> Self {
        Self {
            node_image: config.cluster.node_image.clone(),
            down_events: config.cluster.down_events.clone(),
            lb_container: config.lb_container(cluster),
            lb_port: config.load_balancer.port,
            public_url: config.load_balancer.public_url.clone(),
        }
    }
}

/// Snapshot served by `GET /state`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterState {
    pub name: String,
    pub nodes: Vec<Node>,
    pub services: Vec<ServiceConfig>,
}

struct Deployment {
    config: ServiceConfig,
    placed: Vec<ServiceNode>,
}

// ── Controller ────────────────────────────────────────────────────

pub struct Controller<R> {
    directory: NodeDirectory<R>,
    lb: HaproxyClient,
    registry: ServiceRegistry,
    settings: ControllerSettings,
    lock: AllocationLock,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
}

impl<R: ContainerRuntime> Controller<R> {
    pub fn new(
        directory: NodeDirectory<R>,
        lb: HaproxyClient,
        registry: ServiceRegistry,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            directory,
            lb,
            registry,
            settings,
            lock: AllocationLock::new(),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn cluster(&self) -> &str {
        self.directory.cluster()
    }

    pub fn directory(&self) -> &NodeDirectory<R> {
        &self.directory
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn load_balancer(&self) -> &HaproxyClient {
        &self.lb
    }

    /// Start a new node container and watch it for failure.
    ///
    /// Naming and starting happen under the allocation lock, so concurrent
    /// calls never pick the same name. The monitor is subscribed before the
    /// container starts.
    pub async fn create_node(self: &Arc<Self>) -> ClusterResult<ContainerInfo> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.create_node_locked().await })
            .await
            .map_err(|e| ClusterError::Task(e.to_string()))?
    }

    async fn create_node_locked(self: &Arc<Self>) -> ClusterResult<ContainerInfo> {
        let _guard = self.lock.acquire().await;

        let name = self.directory.next_node_name().await?.to_string();
        let runtime = self.directory.runtime();

        let monitor = watch_node(
            runtime.as_ref(),
            &name,
            &self.settings.down_events,
            vec![self.migration_handler()],
        )
        .await?;

        let spec = RunSpec::node(&self.settings.node_image, &name, self.cluster());
        let info = match runtime.run_container(&spec).await {
            Ok(info) => info,
            Err(e) => {
                monitor.abort();
                error!(node = %name, error = %e, "failed to start node");
                return Err(e.into());
            }
        };

        self.track_monitor(monitor);
        info!(node = %name, image = %info.image, state = %info.state, "node created");
        Ok(info)
    }

    /// Deploy `request.replicas` replicas of a service onto free nodes.
    ///
    /// The allocation runs on its own task: dropping the returned future
    /// leaves it running until every replica has started or failed and the
    /// registry is written.
    pub async fn deploy_service(
        self: &Arc<Self>,
        request: DeployRequest,
    ) -> ClusterResult<ServiceConfig> {
        validate(&request)?;
        info!(
            alias = %request.alias,
            image = %request.image,
            replicas = request.replicas,
            "deploying service"
        );

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let guard = controller.lock.acquire().await;
            let deployment = controller.allocate(&guard, &request, None).await?;
            Ok::<_, ClusterError>(deployment.config)
        })
        .await
        .map_err(|e| ClusterError::Task(e.to_string()))?
    }

    /// Move every service placed on `node` to another free node.
    ///
    /// Never fails: per-service problems are recorded in the report. Each
    /// service moves on its own task, which runs to completion even if the
    /// caller goes away.
    pub async fn migrate_services(self: &Arc<Self>, reason: &str, node: &str) -> MigrationReport {
        info!(%node, %reason, "migrating services off node");
        let mut report = MigrationReport::new(node, reason);

        let services = match self.registry.services_on_node(node).await {
            Ok(services) => services,
            Err(e) => {
                error!(%node, error = %e, "cannot list services on failed node");
                report.scan_error = Some(e.to_string());
                return report;
            }
        };

        for service in services {
            let alias = service.name.clone();
            let controller = Arc::clone(self);
            let failed = node.to_string();
            let task =
                tokio::spawn(async move { controller.migrate_service(&service, &failed).await });
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => MigrationOutcome::Failed {
                    alias,
                    reason: format!("migration task failed: {e}"),
                },
            };
            match &outcome {
                MigrationOutcome::Redeployed { alias, node: target } => {
                    info!(%alias, from = %node, to = %target, "service migrated")
                }
                MigrationOutcome::Failed { alias, reason } => {
                    error!(%alias, from = %node, %reason, "service migration failed")
                }
            }
            report.outcomes.push(outcome);
        }

        report
    }

    pub async fn state(&self) -> ClusterResult<ClusterState> {
        Ok(ClusterState {
            name: self.cluster().to_string(),
            nodes: self.directory.node_state().await?,
            services: self.registry.all_services().await?,
        })
    }

    /// Base URL under which services are reachable through the load balancer.
    pub async fn public_url(&self) -> ClusterResult<String> {
        if let Some(url) = &self.settings.public_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        self.directory
            .published_url(&self.settings.lb_container, self.settings.lb_port)
            .await
    }

    /// Nodes with a monitor still watching or dispatching.
    pub fn watched_nodes(&self) -> Vec<String> {
        let mut monitors = self.monitors.lock().unwrap_or_else(|e| e.into_inner());
        monitors.retain(|_, m| !m.is_finished());
        let mut nodes: Vec<String> = monitors.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Abort idle monitors and wait for dispatched ones to finish migrating.
    pub async fn shutdown(&self) {
        let monitors: Vec<(String, MonitorHandle)> = {
            let mut monitors = self.monitors.lock().unwrap_or_else(|e| e.into_inner());
            monitors.drain().collect()
        };
        for (node, mut monitor) in monitors {
            if monitor.phase() == MonitorPhase::Watching {
                monitor.abort();
                debug!(%node, "failure monitor aborted");
            } else {
                info!(%node, "waiting for migration off node to finish");
                monitor.wait_done().await;
            }
        }
        info!("controller shut down");
    }

    fn track_monitor(&self, monitor: MonitorHandle) {
        let mut monitors = self.monitors.lock().unwrap_or_else(|e| e.into_inner());
        monitors.retain(|_, m| !m.is_finished());
        if let Some(old) = monitors.insert(monitor.node().to_string(), monitor) {
            old.abort();
        }
    }

    fn migration_handler(self: &Arc<Self>) -> NodeDownHandler {
        let controller: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: RuntimeEvent| {
            let controller = controller.clone();
            Box::pin(async move {
                let Some(controller) = controller.upgrade() else {
                    debug!(node = %event.container, "controller gone, skipping migration");
                    return;
                };
                let report = controller
                    .migrate_services(&event.action, &event.container)
                    .await;
                info!(
                    node = %report.node,
                    redeployed = report.redeployed(),
                    failed = report.failed(),
                    "migration finished"
                );
            })
        })
    }

    /// Unlink `node` from one service and redeploy a single replica elsewhere.
    async fn migrate_service(&self, service: &ServiceConfig, node: &str) -> MigrationOutcome {
        let alias = service.name.clone();
        let Some(placement) = service.placements_on(node).into_iter().next() else {
            return MigrationOutcome::Failed {
                alias,
                reason: format!("no placement on {node}"),
            };
        };

        let guard = self.lock.acquire().await;

        if let Err(e) = self.registry.unlink_node(&alias, node).await {
            return MigrationOutcome::Failed {
                alias,
                reason: format!("unlink failed: {e}"),
            };
        }
        if let Err(e) = self.lb.release_slot(&alias, node).await {
            warn!(%alias, %node, error = %e, "could not release load balancer slot");
        }

        let request = DeployRequest::new(
            &alias,
            &placement.service_image,
            placement.node_port,
            placement.service_port,
        );
        match self.allocate(&guard, &request, Some(node)).await {
            Ok(deployment) => match deployment.placed.into_iter().next() {
                Some(placed) => MigrationOutcome::Redeployed {
                    alias,
                    node: placed.name,
                },
                None => MigrationOutcome::Failed {
                    alias,
                    reason: "no replica placed".to_string(),
                },
            },
            Err(e) => MigrationOutcome::Failed {
                alias,
                reason: e.to_string(),
            },
        }
    }

    /// Place replicas onto free nodes. Caller holds the allocation lock.
    async fn allocate(
        &self,
        _guard: &AllocationGuard<'_>,
        request: &DeployRequest,
        exclude: Option<&str>,
    ) -> ClusterResult<Deployment> {
        let alias = request.alias.as_str();

        let mut free = self
            .directory
            .free_nodes(alias, &self.lb, &self.registry)
            .await?;
        if let Some(excluded) = exclude {
            free.retain(|n| n.name != excluded);
        }
        info!(%alias, free = free.len(), requested = request.replicas, "free nodes for service");

        if request.replicas > free.len() {
            warn!(%alias, requested = request.replicas, available = free.len(), "insufficient capacity");
            return Err(ClusterError::Capacity {
                alias: alias.to_string(),
                requested: request.replicas,
                available: free.len(),
            });
        }

        free.shuffle(&mut rand::thread_rng());
        let public_url = self.public_url().await?;
        let mut config = self.registry.get_service_config(alias).await?;

        // Each unit owns the node it was handed; results are merged after the join.
        let mut units = JoinSet::new();
        let mut unit_nodes = HashMap::new();
        for _ in 0..request.replicas {
            let Some(node) = free.pop() else { break };
            let node_name = node.name.clone();
            let handle = units.spawn(start_replica(
                self.directory.runtime().clone(),
                self.lb.clone(),
                self.cluster().to_string(),
                request.clone(),
                node,
            ));
            unit_nodes.insert(handle.id(), node_name);
        }

        let mut placed = Vec::with_capacity(request.replicas);
        let mut failures = Vec::new();
        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((_, Ok(service_node))) => placed.push(service_node),
                Ok((_, Err(failure))) => failures.push(failure),
                Err(e) => failures.push(ReplicaFailure {
                    node: unit_nodes.remove(&e.id()).unwrap_or_default(),
                    reason: format!("replica task failed: {e}"),
                }),
            }
        }

        config.nodes.extend(placed.iter().cloned());
        config.endpoints = vec![format!("{public_url}/{alias}")];
        self.registry.set_service_config(alias, &config).await?;

        if !failures.is_empty() {
            for failure in &failures {
                error!(%alias, node = %failure.node, reason = %failure.reason, "replica failed");
            }
            return Err(ClusterError::Execution {
                alias: alias.to_string(),
                failures,
            });
        }

        info!(%alias, replicas = placed.len(), "service deployed");
        Ok(Deployment { config, placed })
    }
}

/// Start one replica inside `node` and put its slot in rotation.
async fn start_replica<R: ContainerRuntime>(
    runtime: Arc<R>,
    lb: HaproxyClient,
    cluster: String,
    request: DeployRequest,
    node: Node,
) -> Result<ServiceNode, ReplicaFailure> {
    let fail = |reason: String| ReplicaFailure {
        node: node.name.clone(),
        reason,
    };

    let cmd = replica_command(&request, &node.name);
    debug!(alias = %request.alias, node = %node.name, cmd = ?cmd, "starting replica");

    let output = runtime
        .exec(&node.name, &cmd)
        .await
        .map_err(|e| fail(e.to_string()))?;
    if !output.success() {
        return Err(fail(format!(
            "exit code {}: {}",
            output.exit_code,
            output.output.trim()
        )));
    }
    info!(alias = %request.alias, node = %node.name, "replica started");

    let address = match node.address {
        Some(address) => address,
        None => runtime
            .inspect_container(&node.name)
            .await
            .map_err(|e| fail(e.to_string()))?
            .address_on(&cluster)
            .ok_or_else(|| fail(format!("no address on {cluster}")))?,
    };

    lb.register_service(&request.alias, &node.name, address, request.node_port)
        .await
        .map_err(|e| fail(format!("load balancer registration failed: {e}")))?;

    Ok(ServiceNode {
        name: node.name.clone(),
        service_image: request.image.clone(),
        node_port: request.node_port,
        service_port: request.service_port,
    })
}

/// `docker run` executed inside the node for one replica.
pub fn replica_command(request: &DeployRequest, node_name: &str) -> Vec<String> {
    vec![
        "docker".to_string(),
        "run".to_string(),
        "-tid".to_string(),
        "--rm".to_string(),
        "-p".to_string(),
        format!("{}:{}", request.node_port, request.service_port),
        "--name".to_string(),
        format!("{}.{}", request.alias, node_name),
        request.image.clone(),
    ]
}

fn validate(request: &DeployRequest) -> ClusterResult<()> {
    if request.alias.is_empty() || !request.alias.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ClusterError::Validation(format!(
            "alias must be alphanumeric, got '{}'",
            request.alias
        )));
    }
    if request.image.trim().is_empty() {
        return Err(ClusterError::Validation("image is required".to_string()));
    }
    if request.node_port == 0 {
        return Err(ClusterError::Validation("node_port is required".to_string()));
    }
    if request.service_port == 0 {
        return Err(ClusterError::Validation("service_port is required".to_string()));
    }
    if request.replicas == 0 {
        return Err(ClusterError::Validation("replicas must be at least 1".to_string()));
    }
    Ok(())
}
