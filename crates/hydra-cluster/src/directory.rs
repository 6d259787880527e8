//! Node directory — which nodes exist in the cluster and where they are.
//!
//! Liveness is presence in the runtime's container list for the cluster
//! network. Nothing is cached: every query asks the runtime.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use hydra_core::{Node, NodeName};
use hydra_lb::HaproxyClient;
use hydra_registry::ServiceRegistry;
use hydra_runtime::ContainerRuntime;

use crate::error::{ClusterError, ClusterResult};

pub struct NodeDirectory<R> {
    runtime: Arc<R>,
    cluster: String,
}

impl<R: ContainerRuntime> NodeDirectory<R> {
    pub fn new(runtime: Arc<R>, cluster: impl Into<String>) -> Self {
        Self {
            runtime,
            cluster: cluster.into(),
        }
    }

    /// Cluster name, which is also the cluster network name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Live nodes in sequence order.
    ///
    /// Containers on the network whose names do not follow
    /// `node-<seq>.<cluster>` (registry, load balancer, controller) are
    /// not nodes.
    pub async fn nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self
            .named_nodes()
            .await?
            .into_iter()
            .map(|(_, node)| node)
            .collect())
    }

    /// Snapshot of `{name, ip}` for every live node.
    pub async fn node_state(&self) -> ClusterResult<Vec<Node>> {
        self.nodes().await
    }

    /// Name for the next node: one past the highest live sequence number.
    pub async fn next_node_name(&self) -> ClusterResult<NodeName> {
        let next = self
            .named_nodes()
            .await?
            .last()
            .map(|(name, _)| name.successor())
            .transpose()?
            .unwrap_or_else(|| NodeName::first(&self.cluster));
        Ok(next)
    }

    /// Nodes free for `alias`: the load balancer reports the node's slot
    /// in `MAINT` and the registry holds no placement of `alias` on it.
    pub async fn free_nodes(
        &self,
        alias: &str,
        lb: &HaproxyClient,
        registry: &ServiceRegistry,
    ) -> ClusterResult<Vec<Node>> {
        let free_slots: HashSet<String> = lb
            .free_nodes(alias)
            .await?
            .into_iter()
            .map(|row| row.svname().to_string())
            .collect();
        let config = registry.get_service_config(alias).await?;

        let free: Vec<Node> = self
            .named_nodes()
            .await?
            .into_iter()
            .filter(|(name, node)| free_slots.contains(&name.slot()) && !config.has_node(&node.name))
            .map(|(_, node)| node)
            .collect();

        debug!(%alias, free = free.len(), free_slots = free_slots.len(), "free nodes computed");
        Ok(free)
    }

    /// Address of a node on the cluster network.
    pub async fn address_of(&self, node_name: &str) -> ClusterResult<IpAddr> {
        let info = self.runtime.inspect_container(node_name).await?;
        info.address_on(&self.cluster)
            .ok_or_else(|| ClusterError::NotFound(format!("{node_name} has no address on {}", self.cluster)))
    }

    /// `http://<host ip>:<host port>` for `port/tcp` published by `container`.
    pub async fn published_url(&self, container: &str, port: u16) -> ClusterResult<String> {
        let info = self.runtime.inspect_container(container).await?;
        let binding = info
            .published_tcp(port)
            .ok_or_else(|| ClusterError::NotFound(format!("{container} does not publish {port}/tcp")))?;
        Ok(format!("http://{}:{}", binding.host_ip, binding.host_port))
    }

    async fn named_nodes(&self) -> ClusterResult<Vec<(NodeName, Node)>> {
        let mut nodes: Vec<(NodeName, Node)> = self
            .runtime
            .list_containers(&self.cluster)
            .await?
            .into_iter()
            .filter_map(|info| {
                let name = NodeName::parse(&info.name).ok()?;
                if name.cluster() != self.cluster {
                    return None;
                }
                let node = Node {
                    address: info.address_on(&self.cluster),
                    name: info.name,
                };
                Some((name, node))
            })
            .collect();
        nodes.sort_by_key(|(name, _)| name.seq());
        Ok(nodes)
    }
}

/// Cluster name of the controller's own container: its first network.
pub async fn discover_cluster<R: ContainerRuntime>(
    runtime: &R,
    self_container: &str,
) -> ClusterResult<String> {
    let info = runtime.inspect_container(self_container).await?;
    info.primary_network()
        .map(str::to_string)
        .ok_or_else(|| ClusterError::NotFound(format!("{self_container} is not attached to a network")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_runtime::memory::MemoryRuntime;

    fn directory(runtime: &MemoryRuntime) -> NodeDirectory<MemoryRuntime> {
        NodeDirectory::new(Arc::new(runtime.clone()), "test")
    }

    #[tokio::test]
    async fn next_node_name_starts_at_one() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("redis.test", "redis", &["test"]);
        let dir = directory(&runtime);

        assert_eq!(dir.next_node_name().await.unwrap().to_string(), "node-1.test");
    }

    #[tokio::test]
    async fn next_node_name_follows_highest_sequence() {
        let runtime = MemoryRuntime::new();
        for name in ["node-1.test", "node-10.test", "node-2.test"] {
            runtime.add_container(name, "docker:dind", &["test"]);
        }
        let dir = directory(&runtime);

        assert_eq!(dir.next_node_name().await.unwrap().to_string(), "node-11.test");
    }

    #[tokio::test]
    async fn nodes_excludes_infrastructure_and_foreign_clusters() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("haproxy.test", "haproxy", &["test"]);
        runtime.add_container("node-2.test", "docker:dind", &["test"]);
        runtime.add_container("node-1.test", "docker:dind", &["test"]);
        runtime.add_container("node-3.other", "docker:dind", &["test"]);

        let names: Vec<String> = directory(&runtime)
            .nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["node-1.test", "node-2.test"]);
    }

    #[tokio::test]
    async fn published_url_reads_host_binding() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("haproxy.test", "haproxy", &["test"]);
        runtime.publish_port("haproxy.test", 8888, "0.0.0.0", 32771);
        let dir = directory(&runtime);

        assert_eq!(
            dir.published_url("haproxy.test", 8888).await.unwrap(),
            "http://0.0.0.0:32771"
        );
        assert!(matches!(
            dir.published_url("haproxy.test", 9000).await,
            Err(ClusterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn address_of_missing_node_is_not_found() {
        let runtime = MemoryRuntime::new();
        let err = directory(&runtime).address_of("node-4.test").await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn discover_cluster_uses_first_network() {
        let runtime = MemoryRuntime::new();
        runtime.add_container("controller", "hydra", &["prod"]);
        assert_eq!(discover_cluster(&runtime, "controller").await.unwrap(), "prod");
    }
}
