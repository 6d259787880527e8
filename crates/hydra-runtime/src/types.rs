//! Runtime-neutral container types.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A container as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Runtime state, e.g. `running`, `exited`.
    pub state: String,
    /// Attached networks and the container's address on each.
    pub networks: HashMap<String, Option<IpAddr>>,
    /// Published ports keyed `<port>/<proto>`.
    pub ports: HashMap<String, Vec<PublishedPort>>,
}

impl ContainerInfo {
    /// Address on the named network, if attached and assigned.
    pub fn address_on(&self, network: &str) -> Option<IpAddr> {
        self.networks.get(network).copied().flatten()
    }

    /// First host binding of a published TCP port.
    pub fn published_tcp(&self, port: u16) -> Option<&PublishedPort> {
        self.ports.get(&format!("{port}/tcp"))?.first()
    }

    /// Name of the first attached network, in name order.
    pub fn primary_network(&self) -> Option<&str> {
        self.networks.keys().min().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    pub host_ip: String,
    pub host_port: u16,
}

/// Options for starting a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub name: String,
    pub hostname: String,
    pub network: String,
    pub privileged: bool,
    pub tty: bool,
    pub stdin_open: bool,
    pub detach: bool,
    /// Remove the container when it stops.
    pub auto_remove: bool,
}

impl RunSpec {
    /// A cluster node: privileged, interactive, detached, and self-removing.
    pub fn node(image: &str, name: &str, network: &str) -> Self {
        Self {
            image: image.to_string(),
            name: name.to_string(),
            hostname: name.to_string(),
            network: network.to_string(),
            privileged: true,
            tty: true,
            stdin_open: true,
            detach: true,
            auto_remove: true,
        }
    }
}

/// Result of a command executed inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub container: String,
    /// Event kind, e.g. `die`, `stop`.
    pub action: String,
    /// Unix timestamp (seconds).
    pub time: i64,
}

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub container: String,
    pub actions: Vec<String>,
}

impl EventFilter {
    pub fn new(container: &str, actions: &[String]) -> Self {
        Self {
            container: container.to_string(),
            actions: actions.to_vec(),
        }
    }

    pub fn matches(&self, event: &RuntimeEvent) -> bool {
        event.container == self.container && self.actions.iter().any(|a| *a == event.action)
    }
}

/// A live event subscription.
///
/// Dropping (or [`cancel`](Self::cancel)ling) it tells the producer to stop
/// and release the underlying stream.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::Receiver<RuntimeEvent>,
}

impl EventSubscription {
    /// A subscription and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<RuntimeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Next matching event, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<RuntimeEvent> {
        self.rx.recv().await
    }

    pub fn cancel(mut self) {
        self.rx.close();
    }
}
