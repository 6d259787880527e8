//! hydra.toml configuration parser.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working configuration for a controller running inside its cluster.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HydraConfig {
    pub cluster: ClusterSection,
    pub runtime: RuntimeSection,
    pub registry: RegistrySection,
    pub load_balancer: LoadBalancerSection,
    pub api: ApiSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Cluster (and network) name. Discovered from the controller's own
    /// container when absent.
    pub name: Option<String>,
    /// Container the controller runs in. Defaults to `$HOSTNAME`.
    pub self_container: Option<String>,
    pub node_image: String,
    pub down_events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub socket: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Redis URL. Defaults to `redis://redis.<cluster>:6379`.
    pub url: Option<String>,
    /// Embedded redb file. Takes precedence over `url`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSection {
    pub socket: PathBuf,
    /// Load balancer container. Defaults to `haproxy.<cluster>`.
    pub container: Option<String>,
    /// Frontend port published by the load balancer container.
    pub port: u16,
    /// Fixed endpoint base URL, bypassing discovery.
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub port: u16,
}

pub const DEFAULT_NODE_IMAGE: &str = "docker:dind";
pub const DEFAULT_DOWN_EVENTS: [&str; 4] = ["destroy", "die", "kill", "stop"];
pub const DEFAULT_LB_PORT: u16 = 8888;

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            name: None,
            self_container: None,
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            down_events: DEFAULT_DOWN_EVENTS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/var/run/docker.sock"),
        }
    }
}

impl Default for LoadBalancerSection {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/var/run/haproxy/admin.sock"),
            container: None,
            port: DEFAULT_LB_PORT,
            public_url: None,
        }
    }
}

impl Default for ApiSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl HydraConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HydraConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Redis URL for the given cluster, honoring an explicit override.
    pub fn registry_url(&self, cluster: &str) -> String {
        self.registry
            .url
            .clone()
            .unwrap_or_else(|| format!("redis://redis.{cluster}:6379"))
    }

    /// Load balancer container name for the given cluster.
    pub fn lb_container(&self, cluster: &str) -> String {
        self.load_balancer
            .container
            .clone()
            .unwrap_or_else(|| format!("haproxy.{cluster}"))
    }
}
