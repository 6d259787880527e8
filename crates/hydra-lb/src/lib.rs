//! hydra-lb — control client for the cluster load balancer.
//!
//! The load balancer (HAProxy) is pre-provisioned with a backend per
//! service and a fixed number of server slots per backend (`node1`,
//! `node2`, ...). A slot in `MAINT` is unbound; binding a node means
//! pointing the slot at the node's address and putting it in rotation.
//! Slot capacity therefore bounds a service's replica count regardless of
//! how many nodes exist.
//!
//! # Protocol
//!
//! One line-oriented command per UNIX-socket connection:
//!
//! ```text
//! show stat                                   → CSV report
//! set server <alias>/<slot> addr <ip> port <p> → status text
//! set server <alias>/<slot> state ready        → status text
//! ```

pub mod client;
pub mod error;
pub mod stat;

#[cfg(feature = "test-support")]
pub mod testing;

pub use client::HaproxyClient;
pub use error::{LbError, LbResult};
pub use stat::{StatRow, parse_report};
