//! hydra-runtime — the container runtime as seen by the controller.
//!
//! Nodes are containers on the cluster's private network; services run as
//! containers inside nodes. The controller needs only a handful of runtime
//! operations, captured by [`ContainerRuntime`]:
//!
//! - list containers on a network
//! - inspect a container by name
//! - run a container
//! - execute a command inside a running container
//! - subscribe to lifecycle events of one container
//!
//! [`DockerClient`] implements it against the Docker Engine API over the
//! daemon's UNIX socket. With the `test-support` feature,
//! [`memory::MemoryRuntime`] implements it in process.

pub mod docker;
pub mod error;
pub mod types;

#[cfg(feature = "test-support")]
pub mod memory;

use std::future::Future;

pub use docker::DockerClient;
pub use error::{RuntimeError, RuntimeResult};
pub use types::*;

/// Operations the controller performs against the container runtime.
///
/// Calls block the calling task until the runtime answers; there are no
/// timeouts at this layer.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Containers attached to `network`.
    fn list_containers(
        &self,
        network: &str,
    ) -> impl Future<Output = RuntimeResult<Vec<ContainerInfo>>> + Send;

    /// A container by name. `RuntimeError::NotFound` if absent.
    fn inspect_container(
        &self,
        name: &str,
    ) -> impl Future<Output = RuntimeResult<ContainerInfo>> + Send;

    /// Create and start a container, returning its post-start state.
    fn run_container(
        &self,
        spec: &RunSpec,
    ) -> impl Future<Output = RuntimeResult<ContainerInfo>> + Send;

    /// Run `cmd` inside `container` and wait for it to exit.
    fn exec(
        &self,
        container: &str,
        cmd: &[String],
    ) -> impl Future<Output = RuntimeResult<ExecOutput>> + Send;

    /// Subscribe to events matching `filter`.
    ///
    /// Events that occur after this returns are delivered; the subscription
    /// can be established before the container exists.
    fn subscribe(
        &self,
        filter: &EventFilter,
    ) -> impl Future<Output = RuntimeResult<EventSubscription>> + Send;
}
