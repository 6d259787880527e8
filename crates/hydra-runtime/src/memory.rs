//! In-process container runtime for tests.
//!
//! Containers live in a map; addresses come from `172.18.0.0/24` in
//! creation order. Execs succeed unless the target was marked failing, and
//! every completed exec is appended to a log so tests can check ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ContainerRuntime;
use crate::error::{RuntimeError, RuntimeResult};
use crate::types::*;

/// Actions emitted, in order, when a container is stopped.
pub const STOP_ACTIONS: [&str; 4] = ["kill", "die", "stop", "destroy"];

/// A completed exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub container: String,
    pub cmd: Vec<String>,
    pub exit_code: i64,
}

impl ExecRecord {
    /// Value following `flag` in the command line, e.g. `--name`.
    pub fn arg(&self, flag: &str) -> Option<&str> {
        let pos = self.cmd.iter().position(|a| a == flag)?;
        self.cmd.get(pos + 1).map(String::as_str)
    }
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, ContainerInfo>,
    next_host: u8,
    next_id: u64,
    exec_log: Vec<ExecRecord>,
    failing: HashSet<String>,
    exec_latency: Option<(Duration, Duration)>,
    subscribers: Vec<(EventFilter, mpsc::Sender<RuntimeEvent>)>,
}

impl State {
    fn next_address(&mut self) -> IpAddr {
        self.next_host = self.next_host.wrapping_add(1).max(2);
        IpAddr::V4(Ipv4Addr::new(172, 18, 0, self.next_host))
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", self.next_id)
    }

    fn emit(&mut self, container: &str, action: &str) {
        let event = RuntimeEvent {
            container: container.to_string(),
            action: action.to_string(),
            time: 0,
        };
        self.subscribers.retain(|(filter, tx)| {
            if tx.is_closed() {
                return false;
            }
            if filter.matches(&event) {
                let _ = tx.try_send(event.clone());
            }
            true
        });
    }
}

/// Shared, cloneable in-memory runtime.
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a running container attached to `networks`, returning its address.
    pub fn add_container(&self, name: &str, image: &str, networks: &[&str]) -> IpAddr {
        let mut state = self.lock();
        let address = state.next_address();
        let id = state.next_id();
        let info = ContainerInfo {
            id,
            name: name.to_string(),
            image: image.to_string(),
            state: "running".to_string(),
            networks: networks
                .iter()
                .map(|n| (n.to_string(), Some(address)))
                .collect(),
            ports: HashMap::new(),
        };
        state.containers.insert(name.to_string(), info);
        address
    }

    /// Add a fully described container.
    pub fn insert_container(&self, info: ContainerInfo) {
        self.lock().containers.insert(info.name.clone(), info);
    }

    /// Publish `port/tcp` of an existing container on the host.
    pub fn publish_port(&self, name: &str, port: u16, host_ip: &str, host_port: u16) {
        if let Some(info) = self.lock().containers.get_mut(name) {
            info.ports.insert(
                format!("{port}/tcp"),
                vec![PublishedPort {
                    host_ip: host_ip.to_string(),
                    host_port,
                }],
            );
        }
    }

    /// Stop and remove a container, emitting its lifecycle events.
    pub fn stop_container(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.containers.remove(name).is_none() {
            return false;
        }
        for action in STOP_ACTIONS {
            state.emit(name, action);
        }
        debug!(%name, "memory runtime stopped container");
        true
    }

    /// Make every exec inside `container` exit non-zero.
    pub fn fail_exec_on(&self, container: &str) {
        self.lock().failing.insert(container.to_string());
    }

    /// Delay each exec by a random duration in `min..=max`.
    pub fn set_exec_latency(&self, min: Duration, max: Duration) {
        self.lock().exec_latency = Some((min, max.max(min)));
    }

    pub fn exec_log(&self) -> Vec<ExecRecord> {
        self.lock().exec_log.clone()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    /// Live subscriptions, pruning any whose receiver is gone.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }
}

impl ContainerRuntime for MemoryRuntime {
    async fn list_containers(&self, network: &str) -> RuntimeResult<Vec<ContainerInfo>> {
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|c| c.networks.contains_key(network))
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        self.lock()
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name}")))
    }

    async fn run_container(&self, spec: &RunSpec) -> RuntimeResult<ContainerInfo> {
        let mut state = self.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container name {} is already in use", spec.name),
            });
        }
        let address = state.next_address();
        let id = state.next_id();
        let info = ContainerInfo {
            id,
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "running".to_string(),
            networks: HashMap::from([(spec.network.clone(), Some(address))]),
            ports: HashMap::new(),
        };
        state.containers.insert(spec.name.clone(), info.clone());
        state.emit(&spec.name, "start");
        Ok(info)
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> RuntimeResult<ExecOutput> {
        let latency = {
            let state = self.lock();
            if !state.containers.contains_key(container) {
                return Err(RuntimeError::NotFound(format!(
                    "No such container: {container}"
                )));
            }
            state
                .exec_latency
                .map(|(min, max)| rand::thread_rng().gen_range(min..=max))
        };

        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let output = if state.failing.contains(container) {
            ExecOutput {
                exit_code: 125,
                output: "docker: Error response from daemon: port is already allocated.\n"
                    .to_string(),
            }
        } else {
            ExecOutput {
                exit_code: 0,
                output: format!("{}\n", state.next_id()),
            }
        };
        state.exec_log.push(ExecRecord {
            container: container.to_string(),
            cmd: cmd.to_vec(),
            exit_code: output.exit_code,
        });
        Ok(output)
    }

    async fn subscribe(&self, filter: &EventFilter) -> RuntimeResult<EventSubscription> {
        let (tx, subscription) = EventSubscription::channel(STOP_ACTIONS.len() * 4);
        self.lock().subscribers.push((filter.clone(), tx));
        Ok(subscription)
    }
}
