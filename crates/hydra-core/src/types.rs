//! Domain types shared across the Hydra crates.
//!
//! `ServiceConfig` is the registry document stored under each service
//! alias. Its JSON shape is the wire format other tools read, so field
//! names must not change.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Service alias, unique within a cluster.
pub type Alias = String;

// ── Service ───────────────────────────────────────────────────────

/// One replica of a service bound to one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceNode {
    /// Node name (`node-<seq>.<cluster>`).
    pub name: String,
    pub service_image: String,
    /// Port the replica publishes on the node.
    pub node_port: u16,
    /// Port the service listens on inside its container.
    pub service_port: u16,
}

/// Registry document for a service alias.
///
/// A missing document means "new service with zero nodes", which is what
/// [`ServiceConfig::new`] builds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: Alias,
    #[serde(default)]
    pub nodes: Vec<ServiceNode>,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ServiceConfig {
    /// An empty config for a service that has never been deployed.
    pub fn new(alias: &str) -> Self {
        Self {
            name: alias.to_string(),
            nodes: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    /// Whether any replica of this service is placed on `node_name`.
    pub fn has_node(&self, node_name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == node_name)
    }

    /// All placements on `node_name`.
    pub fn placements_on(&self, node_name: &str) -> Vec<ServiceNode> {
        self.nodes
            .iter()
            .filter(|n| n.name == node_name)
            .cloned()
            .collect()
    }

    /// Remove every placement on `node_name`. Returns how many were removed.
    pub fn unlink(&mut self, node_name: &str) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.name != node_name);
        before - self.nodes.len()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A live node container and its address on the cluster network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    #[serde(rename = "ip")]
    pub address: Option<IpAddr>,
}

// ── Requests ──────────────────────────────────────────────────────

/// Parameters of a service deployment.
///
/// Missing fields deserialize to their zero value so that validation, not
/// the JSON decoder, reports what is wrong.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployRequest {
    #[serde(default)]
    pub alias: Alias,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub node_port: u16,
    #[serde(default)]
    pub service_port: u16,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

fn default_replicas() -> usize {
    1
}

impl DeployRequest {
    pub fn new(alias: &str, image: &str, node_port: u16, service_port: u16) -> Self {
        Self {
            alias: alias.to_string(),
            image: image.to_string(),
            node_port,
            service_port,
            replicas: 1,
        }
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}
