use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::info;

use super::{
    network::{DescriptorChanges, HealthCheckOverrides, Network, NetworkStatus},
    provider::ProviderConfig,
    UpstreamError,
};

/// Snapshot of one network as published by the on-chain registry.
///
/// Produced by an external sync loop; the gateway only applies it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub health_check_method: Option<String>,
    #[serde(default, flatten)]
    pub health_check: HealthCheckOverrides,
}

/// Name-keyed set of networks.
#[derive(Default)]
pub struct NetworkRegistry {
    networks: RwLock<HashMap<String, Arc<Network>>>,
}

impl NetworkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `network`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] when a network with the same name exists.
    pub fn add_network(&self, network: Arc<Network>) -> Result<(), UpstreamError> {
        let mut networks = self.networks.write();
        if networks.contains_key(network.name()) {
            return Err(UpstreamError::InvalidConfig(format!(
                "network already registered: {}",
                network.name()
            )));
        }
        info!(network = %network.name(), "network registered");
        networks.insert(network.name().to_string(), network);
        Ok(())
    }

    #[must_use]
    pub fn get_network(&self, name: &str) -> Option<Arc<Network>> {
        self.networks.read().get(name).cloned()
    }

    /// Unregisters and stops the network named `name`.
    pub fn remove_network(&self, name: &str) -> Option<Arc<Network>> {
        let removed = self.networks.write().remove(name);
        if let Some(network) = &removed {
            network.stop();
            info!(network = %name, "network removed");
        }
        removed
    }

    /// Applies a registry snapshot to the network named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::UnknownNetwork`] for unregistered names and
    /// [`UpstreamError::InvalidConfig`] for unusable descriptors.
    pub async fn apply_descriptor(
        &self,
        name: &str,
        descriptor: &NetworkDescriptor,
    ) -> Result<DescriptorChanges, UpstreamError> {
        let network =
            self.get_network(name).ok_or_else(|| UpstreamError::UnknownNetwork(name.to_string()))?;
        network.apply_descriptor(descriptor).await
    }

    #[must_use]
    pub fn networks(&self) -> Vec<Arc<Network>> {
        let mut networks: Vec<_> = self.networks.read().values().cloned().collect();
        networks.sort_by(|a, b| a.name().cmp(b.name()));
        networks
    }

    #[must_use]
    pub fn status(&self) -> Vec<NetworkStatus> {
        self.networks().iter().map(|n| n.status()).collect()
    }

    pub fn start_all(&self) {
        for network in self.networks() {
            network.start();
        }
    }

    pub fn stop_all(&self) {
        for network in self.networks() {
            network.stop();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.read().is_empty()
    }
}
