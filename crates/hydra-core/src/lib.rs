//! hydra-core — domain types, node naming, and configuration shared by every Hydra crate.

pub mod config;
pub mod naming;
pub mod types;

pub use config::HydraConfig;
pub use naming::{NamingError, NodeName, slot_name};
pub use types::*;
