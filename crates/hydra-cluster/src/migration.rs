//! Outcome of moving services off a failed node.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// One replica was started on `node`.
    Redeployed { alias: String, node: String },
    /// The service lost its replica on the failed node and was not redeployed.
    Failed { alias: String, reason: String },
}

impl MigrationOutcome {
    pub fn alias(&self) -> &str {
        match self {
            Self::Redeployed { alias, .. } | Self::Failed { alias, .. } => alias,
        }
    }
}

/// Per-service results of one migration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub node: String,
    pub reason: String,
    pub outcomes: Vec<MigrationOutcome>,
    /// Set when the services on the node could not be listed at all.
    pub scan_error: Option<String>,
}

impl MigrationReport {
    pub fn new(node: &str, reason: &str) -> Self {
        Self {
            node: node.to_string(),
            reason: reason.to_string(),
            outcomes: Vec::new(),
            scan_error: None,
        }
    }

    pub fn redeployed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MigrationOutcome::Redeployed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.redeployed()
    }

    /// Every service was moved and the scan itself succeeded.
    pub fn is_clean(&self) -> bool {
        self.scan_error.is_none() && self.failed() == 0
    }

    pub fn outcome(&self, alias: &str) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.alias() == alias)
    }
}
