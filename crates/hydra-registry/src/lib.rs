//! hydra-registry — the cluster's service registry.
//!
//! The registry is the only durable record of which node runs which
//! service: one JSON [`ServiceConfig`](hydra_core::ServiceConfig) per
//! service alias. An absent key means "no such service, zero nodes".
//!
//! # Architecture
//!
//! ```text
//! ServiceRegistry (typed read/modify/write)
//!   └── RegistryStore (raw key → JSON bytes)
//!       ├── Redis   — the cluster's registry container
//!       └── Embedded — redb file or in-memory, for tests and single-host use
//! ```
//!
//! Writes are last-writer-wins. There is no concurrency token; callers
//! that read-modify-write serialize through the controller's lock.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{RegistryError, RegistryResult};
pub use registry::ServiceRegistry;
pub use store::{EmbeddedStore, RedisStore, RegistryStore};
