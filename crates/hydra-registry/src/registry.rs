//! Typed access to service documents.

use tracing::{debug, warn};

use hydra_core::ServiceConfig;

use crate::error::{RegistryError, RegistryResult};
use crate::store::RegistryStore;

/// Read/modify/write operations over service documents.
#[derive(Clone)]
pub struct ServiceRegistry {
    store: RegistryStore,
}

impl ServiceRegistry {
    pub fn new(store: impl Into<RegistryStore>) -> Self {
        Self {
            store: store.into(),
        }
    }

    /// The stored config for `alias`, or a fresh `{name, nodes: []}` when
    /// the document is absent or cannot be decoded.
    pub async fn get_service_config(&self, alias: &str) -> RegistryResult<ServiceConfig> {
        let Some(raw) = self.store.get(alias).await? else {
            return Ok(ServiceConfig::new(alias));
        };
        match serde_json::from_slice::<ServiceConfig>(&raw) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(%alias, error = %e, "malformed service document, treating as new service");
                Ok(ServiceConfig::new(alias))
            }
        }
    }

    /// Overwrite the config for `alias`. Last writer wins.
    pub async fn set_service_config(
        &self,
        alias: &str,
        config: &ServiceConfig,
    ) -> RegistryResult<()> {
        let value =
            serde_json::to_vec(config).map_err(|e| RegistryError::Serialize(e.to_string()))?;
        self.store.set(alias, &value).await
    }

    /// Every stored service document that decodes.
    pub async fn all_services(&self) -> RegistryResult<Vec<ServiceConfig>> {
        let entries = self.store.entries().await?;
        let mut services = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_slice::<ServiceConfig>(&raw) {
                Ok(config) => services.push(config),
                Err(e) => warn!(%key, error = %e, "skipping malformed service document"),
            }
        }
        Ok(services)
    }

    /// Services with at least one replica placed on `node_name`.
    pub async fn services_on_node(&self, node_name: &str) -> RegistryResult<Vec<ServiceConfig>> {
        Ok(self
            .all_services()
            .await?
            .into_iter()
            .filter(|s| s.has_node(node_name))
            .collect())
    }

    /// Remove every placement of `alias` on `node_name` and persist.
    ///
    /// Returns the updated config.
    pub async fn unlink_node(&self, alias: &str, node_name: &str) -> RegistryResult<ServiceConfig> {
        let mut config = self.get_service_config(alias).await?;
        let removed = config.unlink(node_name);
        self.set_service_config(alias, &config).await?;
        debug!(%alias, node = %node_name, removed, "node unlinked from service");
        Ok(config)
    }
}
