//! hydra-cluster — the orchestration core.
//!
//! # Architecture
//!
//! ```text
//! Controller
//!   ├── AllocationLock (process-local; orders every allocation)
//!   ├── NodeDirectory  (live nodes via the container runtime)
//!   ├── HaproxyClient  (backend slot capacity and activation)
//!   ├── ServiceRegistry (placement documents)
//!   └── failure monitors, one per created node → migrate_services
//! ```
//!
//! A node is free for a service only when its load balancer slot is in
//! `MAINT` and the registry has no placement of that service on it. Both
//! checks and the writes that follow happen under the allocation lock.

pub mod controller;
pub mod directory;
pub mod error;
pub mod migration;
pub mod monitor;

pub use controller::{
    AllocationGuard, AllocationLock, ClusterState, Controller, ControllerSettings, replica_command,
};
pub use directory::{NodeDirectory, discover_cluster};
pub use error::{ClusterError, ClusterResult, ReplicaFailure};
pub use migration::{MigrationOutcome, MigrationReport};
pub use monitor::{MonitorHandle, MonitorPhase, NodeDownHandler, watch_node};
