//! Shared fixtures: an in-memory runtime, a stub HAProxy admin socket, and
//! an in-memory registry wired into one controller for cluster `test`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hydra_cluster::{Controller, ControllerSettings, NodeDirectory};
use hydra_core::{HydraConfig, ServiceConfig, ServiceNode};
use hydra_lb::HaproxyClient;
use hydra_lb::testing::StubHaproxy;
use hydra_registry::{EmbeddedStore, ServiceRegistry};
use hydra_runtime::memory::MemoryRuntime;

pub const CLUSTER: &str = "test";
pub const PUBLIC_URL: &str = "http://127.0.0.1:32768";

pub struct Harness {
    pub runtime: MemoryRuntime,
    pub haproxy: StubHaproxy,
    pub registry: ServiceRegistry,
    pub controller: Arc<Controller<MemoryRuntime>>,
}

impl Harness {
    /// Cluster with the load balancer and registry containers running and
    /// `backends` provisioned as `(alias, slot count)`. No nodes yet.
    pub fn start(backends: &[(&str, u32)]) -> Self {
        let runtime = MemoryRuntime::new();
        runtime.add_container("haproxy.test", "haproxy:2.8", &[CLUSTER]);
        runtime.publish_port("haproxy.test", 8888, "127.0.0.1", 32768);
        runtime.add_container("redis.test", "redis:7", &[CLUSTER]);

        let haproxy = StubHaproxy::start().unwrap();
        for (alias, slots) in backends {
            haproxy.add_backend(alias, *slots);
        }

        let registry = ServiceRegistry::new(EmbeddedStore::open_in_memory().unwrap());
        let settings = ControllerSettings::from_config(&HydraConfig::default(), CLUSTER);
        let controller = Arc::new(Controller::new(
            NodeDirectory::new(Arc::new(runtime.clone()), CLUSTER),
            HaproxyClient::new(haproxy.socket_path()),
            registry.clone(),
            settings,
        ));

        Self {
            runtime,
            haproxy,
            registry,
            controller,
        }
    }

    /// Create `count` nodes through the controller (monitored).
    pub async fn create_nodes(&self, count: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.controller.create_node().await.unwrap().name);
        }
        names
    }

    /// Add node containers directly, bypassing the controller (unmonitored).
    pub fn add_nodes(&self, names: &[&str]) {
        for name in names {
            self.runtime.add_container(name, "docker:dind", &[CLUSTER]);
        }
    }

    pub async fn config(&self, alias: &str) -> ServiceConfig {
        self.registry.get_service_config(alias).await.unwrap()
    }

    /// Record a placement of `alias` on `node` directly in the registry.
    pub async fn place(&self, alias: &str, node: &str) {
        let mut config = self.config(alias).await;
        config.nodes.push(ServiceNode {
            name: node.to_string(),
            service_image: "nginx".to_string(),
            node_port: 8080,
            service_port: 80,
        });
        self.registry.set_service_config(alias, &config).await.unwrap();
    }

    pub fn slot_status(&self, alias: &str, slot: &str) -> String {
        self.haproxy.slot(alias, slot).unwrap().status
    }

    /// Poll until `check` holds for `alias`'s config, or panic after a second.
    pub async fn wait_for_config(&self, alias: &str, check: impl Fn(&ServiceConfig) -> bool) -> ServiceConfig {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let config = self.config(alias).await;
            if check(&config) {
                return config;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting on {alias}: {config:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
