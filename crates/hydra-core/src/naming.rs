//! Node naming convention.
//!
//! Nodes are named `node-<seq>.<cluster>`. The load balancer knows each
//! node by its backend slot name, which drops the dash and the cluster
//! suffix: `node-3.mycluster` is slot `node3`. Names that do not follow
//! the convention are rejected rather than guessed at.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Prefix shared by every node container name.
pub const NODE_PREFIX: &str = "node-";

/// Prefix shared by every load-balancer backend slot reserved for nodes.
pub const SLOT_PREFIX: &str = "node";

static NODE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^node-([0-9]+)\.([A-Za-z0-9][A-Za-z0-9_.-]*)$").expect("valid node name pattern")
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("not a node name (expected node-<seq>.<cluster>): {0:?}")]
    NotANode(String),

    #[error("node sequence exhausted after {0}")]
    SequenceExhausted(String),
}

/// A parsed node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeName {
    seq: u32,
    /// Sequence as written in the container name, zero padding included.
    digits: String,
    cluster: String,
}

impl NodeName {
    pub fn new(seq: u32, cluster: &str) -> Self {
        Self {
            seq,
            digits: seq.to_string(),
            cluster: cluster.to_string(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, NamingError> {
        let caps = NODE_NAME
            .captures(name)
            .ok_or_else(|| NamingError::NotANode(name.to_string()))?;
        let seq = caps[1]
            .parse::<u32>()
            .map_err(|_| NamingError::NotANode(name.to_string()))?;
        Ok(Self {
            seq,
            digits: caps[1].to_string(),
            cluster: caps[2].to_string(),
        })
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Load-balancer backend slot for this node.
    pub fn slot(&self) -> String {
        format!("{SLOT_PREFIX}{}", self.digits)
    }

    /// The name following this one: `max(seq) + 1` in the same cluster.
    pub fn successor(&self) -> Result<Self, NamingError> {
        self.seq
            .checked_add(1)
            .map(|seq| Self::new(seq, &self.cluster))
            .ok_or_else(|| NamingError::SequenceExhausted(self.to_string()))
    }

    /// First node name of a cluster with no nodes.
    pub fn first(cluster: &str) -> Self {
        Self::new(1, cluster)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_PREFIX}{}.{}", self.digits, self.cluster)
    }
}

/// Backend slot name for a node container name.
pub fn slot_name(node_name: &str) -> Result<String, NamingError> {
    NodeName::parse(node_name).map(|n| n.slot())
}
