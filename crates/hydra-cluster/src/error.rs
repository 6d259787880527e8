//! Controller error taxonomy.

use std::fmt;

use thiserror::Error;

use hydra_core::NamingError;
use hydra_lb::LbError;
use hydra_registry::RegistryError;
use hydra_runtime::RuntimeError;

/// One replica that did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaFailure {
    pub node: String,
    pub reason: String,
}

impl fmt::Display for ReplicaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Bad request parameters. Nothing was touched.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Fewer free nodes than requested replicas. Nothing was allocated.
    #[error("not enough free nodes for '{alias}': requested {requested}, available {available}")]
    Capacity {
        alias: String,
        requested: usize,
        available: usize,
    },

    /// Some replicas failed to start. The ones that started stay registered.
    #[error("{} replica(s) of '{alias}' failed to start: {}", .failures.len(), join_failures(.failures))]
    Execution {
        alias: String,
        failures: Vec<ReplicaFailure>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("load balancer error: {0}")]
    LoadBalancer(#[from] LbError),

    #[error("container runtime error: {0}")]
    Runtime(RuntimeError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    /// A controller task panicked or was cancelled by the runtime.
    #[error("controller task failed: {0}")]
    Task(String),
}

impl ClusterError {
    /// Errors caused by the request rather than the cluster.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Capacity { .. })
    }
}

impl From<RuntimeError> for ClusterError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(what) => Self::NotFound(what),
            other => Self::Runtime(other),
        }
    }
}

fn join_failures(failures: &[ReplicaFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ClusterResult<T> = Result<T, ClusterError>;
